//! In-process background job queue.
//!
//! Jobs run on the tokio runtime with at most `workers` of them executing at
//! once. Each job is observable through a polling projection ([`JobState`])
//! that moves `PENDING -> STARTED -> PROGRESS* -> SUCCESS | FAILURE`. Nothing
//! is persisted; finished jobs are kept for polling until the retention limit
//! evicts the oldest.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::error::EvalError;
use crate::progress::{Monotonic, Progress, ProgressSink};

/// Which pipeline a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Golden,
    Retrieval,
    Satisfaction,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Golden => write!(f, "golden"),
            JobKind::Retrieval => write!(f, "retrieval"),
            JobKind::Satisfaction => write!(f, "satisfaction"),
        }
    }
}

/// Polling projection of a job. Serializes to the status body returned by
/// the gateway, e.g. `{"status": "PROGRESS", "progress": {"i": 3, "of": 10, "phase": "dataset"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Started,
    Progress { progress: Progress },
    Success { result: Value },
    Failure { error: String },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Success { .. } | JobState::Failure { .. })
    }
}

/// Bookkeeping for one submitted job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Correlation id carried through logs and outbound requests.
    pub rid: String,
    pub kind: JobKind,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<Uuid, JobRecord>,
    finished: VecDeque<Uuid>,
}

struct QueueInner {
    registry: Mutex<Registry>,
    permits: Arc<Semaphore>,
    max_finished: usize,
}

impl QueueInner {
    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, id: &Uuid, state: JobState) {
        let mut registry = self.registry();
        let finished = state.is_finished();
        let Some(record) = registry.jobs.get_mut(id) else {
            return;
        };
        if record.state.is_finished() {
            return;
        }
        record.state = state;
        if finished {
            record.finished_at = Some(Utc::now());
            registry.finished.push_back(*id);
            while registry.finished.len() > self.max_finished {
                if let Some(evicted) = registry.finished.pop_front() {
                    registry.jobs.remove(&evicted);
                }
            }
        }
    }

    fn progress(&self, id: &Uuid, progress: Progress) {
        let mut registry = self.registry();
        let Some(record) = registry.jobs.get_mut(id) else {
            return;
        };
        if matches!(record.state, JobState::Started | JobState::Progress { .. }) {
            record.state = JobState::Progress { progress };
        }
    }
}

/// Writes a job's progress into its record.
struct RecordProgress {
    id: Uuid,
    inner: Arc<QueueInner>,
}

impl ProgressSink for RecordProgress {
    fn report(&self, progress: Progress) {
        self.inner.progress(&self.id, progress);
    }
}

/// Handle given to running work for reporting progress.
///
/// Clones share one step floor, so a job's polled progress never goes back.
#[derive(Clone)]
pub struct JobContext {
    id: Uuid,
    rid: String,
    sink: Arc<Monotonic<RecordProgress>>,
}

impl JobContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn rid(&self) -> &str {
        &self.rid
    }
}

impl ProgressSink for JobContext {
    fn report(&self, progress: Progress) {
        self.sink.report(progress);
    }
}

/// A bounded-concurrency job queue backed by tokio tasks.
#[derive(Clone)]
pub struct LocalJobQueue {
    inner: Arc<QueueInner>,
}

impl LocalJobQueue {
    /// Create a queue running at most `workers` jobs at once and retaining at
    /// most `max_finished` finished jobs.
    pub fn new(workers: usize, max_finished: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                registry: Mutex::new(Registry::default()),
                permits: Arc::new(Semaphore::new(workers.max(1))),
                max_finished: max_finished.max(1),
            }),
        }
    }

    /// Enqueue `work` and return its job id immediately.
    ///
    /// `rid` becomes the correlation id of the run; when absent the job id is
    /// used. Must be called from within a tokio runtime.
    pub fn submit<F, Fut>(&self, kind: JobKind, rid: Option<String>, work: F) -> Uuid
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, EvalError>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let rid = rid
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| id.simple().to_string());
        let record = JobRecord {
            id,
            rid: rid.clone(),
            kind,
            state: JobState::Pending,
            submitted_at: Utc::now(),
            finished_at: None,
        };
        self.inner.registry().jobs.insert(id, record);
        info!(job_id = %id, rid = %rid, kind = %kind, "Job enqueued");

        let inner = self.inner.clone();
        let span = info_span!("job", rid = %rid, kind = %kind);
        tokio::spawn(
            async move {
                let _permit = match inner.permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        inner.set_state(&id, JobState::Failure { error: e.to_string() });
                        return;
                    }
                };
                inner.set_state(&id, JobState::Started);
                info!("Job started");

                let ctx = JobContext {
                    id,
                    rid,
                    sink: Arc::new(Monotonic::new(RecordProgress {
                        id,
                        inner: inner.clone(),
                    })),
                };
                let outcome = AssertUnwindSafe(work(ctx)).catch_unwind().await;
                let state = match outcome {
                    Ok(Ok(result)) => {
                        info!("Job succeeded");
                        JobState::Success { result }
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "Job failed");
                        JobState::Failure {
                            error: e.to_string(),
                        }
                    }
                    Err(_) => {
                        error!("Job panicked");
                        JobState::Failure {
                            error: "job panicked during execution".to_string(),
                        }
                    }
                };
                inner.set_state(&id, state);
            }
            .instrument(span),
        );
        id
    }

    /// Current state of a job. Unknown or malformed ids report `Pending`.
    pub fn status(&self, id: &str) -> JobState {
        let Ok(id) = Uuid::parse_str(id) else {
            return JobState::Pending;
        };
        self.inner
            .registry()
            .jobs
            .get(&id)
            .map(|r| r.state.clone())
            .unwrap_or(JobState::Pending)
    }

    /// Snapshot of a job's bookkeeping.
    pub fn record(&self, id: &Uuid) -> Option<JobRecord> {
        self.inner.registry().jobs.get(id).cloned()
    }

    /// Poll until the job finishes.
    pub async fn wait(&self, id: &Uuid, interval: Duration) -> JobState {
        loop {
            let state = self.status(&id.to_string());
            if state.is_finished() {
                return state;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Number of jobs that have not finished yet.
    pub fn active_count(&self) -> usize {
        self.inner
            .registry()
            .jobs
            .values()
            .filter(|r| !r.state.is_finished())
            .count()
    }

    /// Number of jobs currently tracked.
    pub fn len(&self) -> usize {
        self.inner.registry().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Phase;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_job_state_wire_shapes() {
        assert_eq!(serde_json::to_value(JobState::Pending).unwrap(), json!({"status": "PENDING"}));
        assert_eq!(serde_json::to_value(JobState::Started).unwrap(), json!({"status": "STARTED"}));
        assert_eq!(
            serde_json::to_value(JobState::Progress {
                progress: Progress::new(1, 4, Phase::Dataset)
            })
            .unwrap(),
            json!({"status": "PROGRESS", "progress": {"i": 1, "of": 4, "phase": "dataset"}})
        );
        assert_eq!(
            serde_json::to_value(JobState::Failure { error: "boom".into() }).unwrap(),
            json!({"status": "FAILURE", "error": "boom"})
        );
    }

    #[tokio::test]
    async fn test_unknown_job_is_pending() {
        let queue = LocalJobQueue::new(1, 8);
        assert_eq!(queue.status(&Uuid::new_v4().to_string()), JobState::Pending);
        assert_eq!(queue.status("not-a-uuid"), JobState::Pending);
    }

    #[tokio::test]
    async fn test_job_succeeds_with_result() {
        let queue = LocalJobQueue::new(2, 8);
        let id = queue.submit(JobKind::Retrieval, None, |_ctx| async { Ok(json!({"ok": true})) });
        let state = queue.wait(&id, POLL).await;
        assert_eq!(state, JobState::Success { result: json!({"ok": true}) });
        assert!(queue.record(&id).unwrap().finished_at.is_some());
    }

    #[tokio::test]
    async fn test_job_failure_carries_error_text() {
        let queue = LocalJobQueue::new(1, 8);
        let id = queue.submit(JobKind::Golden, Some("rid-1".into()), |_ctx| async {
            Err(EvalError::DataDirNotFound("/missing".into()))
        });
        match queue.wait(&id, POLL).await {
            JobState::Failure { error } => assert!(error.contains("/missing")),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(queue.record(&id).unwrap().rid, "rid-1");
    }

    #[tokio::test]
    async fn test_panicking_job_fails() {
        let queue = LocalJobQueue::new(1, 8);
        let id = queue.submit(JobKind::Golden, None, |_ctx| async {
            if true {
                panic!("worker bug");
            }
            Ok(Value::Null)
        });
        assert!(matches!(queue.wait(&id, POLL).await, JobState::Failure { .. }));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_visible() {
        let queue = LocalJobQueue::new(1, 8);
        let gate = Arc::new(Notify::new());
        let release = gate.clone();
        let id = queue.submit(JobKind::Golden, None, move |ctx| async move {
            ctx.report(Progress::new(3, 10, Phase::Dataset));
            ctx.report(Progress::new(2, 10, Phase::Dataset));
            release.notified().await;
            Ok(Value::Null)
        });

        loop {
            if let JobState::Progress { progress } = queue.status(&id.to_string()) {
                assert_eq!(progress.i, 3);
                break;
            }
            tokio::time::sleep(POLL).await;
        }
        gate.notify_one();
        assert!(matches!(queue.wait(&id, POLL).await, JobState::Success { .. }));
    }

    #[tokio::test]
    async fn test_cloned_contexts_share_progress_floor() {
        let queue = LocalJobQueue::new(1, 8);
        let gate = Arc::new(Notify::new());
        let release = gate.clone();
        let id = queue.submit(JobKind::Golden, None, move |ctx| async move {
            let second = ctx.clone();
            ctx.report(Progress::new(5, 10, Phase::Dataset));
            second.report(Progress::new(4, 10, Phase::Evaluation));
            second.report(Progress::new(6, 10, Phase::Evaluation));
            ctx.report(Progress::new(1, 10, Phase::Dataset));
            release.notified().await;
            Ok(Value::Null)
        });

        loop {
            if let JobState::Progress { progress } = queue.status(&id.to_string())
                && progress.i == 6
            {
                assert_eq!(progress.phase, Phase::Evaluation);
                break;
            }
            tokio::time::sleep(POLL).await;
        }
        tokio::time::sleep(POLL).await;
        assert_eq!(
            queue.status(&id.to_string()),
            JobState::Progress {
                progress: Progress::new(6, 10, Phase::Evaluation)
            }
        );
        gate.notify_one();
        assert!(matches!(queue.wait(&id, POLL).await, JobState::Success { .. }));
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_concurrency() {
        let queue = LocalJobQueue::new(2, 16);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ids: Vec<Uuid> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                queue.submit(JobKind::Retrieval, None, move |_ctx| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
            })
            .collect();
        for id in &ids {
            queue.wait(id, POLL).await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.active_count(), 0);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_oldest_first() {
        let queue = LocalJobQueue::new(1, 2);
        let mut ids = Vec::new();
        for n in 0..3 {
            let id = queue.submit(JobKind::Retrieval, None, move |_ctx| async move { Ok(json!(n)) });
            queue.wait(&id, POLL).await;
            ids.push(id);
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.status(&ids[0].to_string()), JobState::Pending);
        assert_eq!(queue.status(&ids[2].to_string()), JobState::Success { result: json!(2) });
    }
}
