//! Progress reporting shared by all pipelines.
//!
//! Pipelines report `(i, of, phase)` through a [`ProgressSink`]. A run with
//! several phases chains them with [`Chained`], which offsets the step and
//! substitutes the combined total. [`Monotonic`] sits in front of a job's
//! record so pollers never see the step go backwards.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// The pipeline stage a progress update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Dataset,
    Evaluation,
    Retrieval,
    Conversation,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Dataset => write!(f, "dataset"),
            Phase::Evaluation => write!(f, "evaluation"),
            Phase::Retrieval => write!(f, "retrieval"),
            Phase::Conversation => write!(f, "conversation"),
        }
    }
}

/// A single progress update. Serialized as `{"i", "of", "phase"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub i: usize,
    pub of: usize,
    pub phase: Phase,
}

impl Progress {
    /// Build an update; `of` is at least 1 and `i` never exceeds it.
    pub fn new(i: usize, of: usize, phase: Phase) -> Self {
        let of = of.max(1);
        Self {
            i: i.min(of),
            of,
            phase,
        }
    }
}

/// Receiver of progress updates.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// Discards every update.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}

/// Re-bases a later phase onto a combined counter.
pub struct Chained<'a> {
    inner: &'a dyn ProgressSink,
    offset: usize,
    total: usize,
}

impl<'a> Chained<'a> {
    pub fn new(inner: &'a dyn ProgressSink, offset: usize, total: usize) -> Self {
        Self {
            inner,
            offset,
            total,
        }
    }
}

impl ProgressSink for Chained<'_> {
    fn report(&self, progress: Progress) {
        self.inner.report(Progress::new(
            self.offset + progress.i,
            self.total,
            progress.phase,
        ));
    }
}

/// Drops updates whose step is lower than one already forwarded.
pub struct Monotonic<S> {
    inner: S,
    last: Mutex<usize>,
}

impl<S: ProgressSink> Monotonic<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            last: Mutex::new(0),
        }
    }
}

impl<S: ProgressSink> ProgressSink for Monotonic<S> {
    fn report(&self, progress: Progress) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if progress.i < *last {
            return;
        }
        *last = progress.i;
        self.inner.report(progress);
    }
}
