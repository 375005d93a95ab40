//! Golden dataset construction.
//!
//! Every file under the data directory is sent to the dataset model once,
//! asking for a fixed number of question/answer pairs grounded in that file.

use ragprobe_core::parse::{WARN_PREVIEW_CHARS, preview};
use ragprobe_core::{
    ChatMessage, CompletionProvider, CompletionRequest, RetryPolicy, Sampling, parse_pairs,
    with_retry,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::{EvalError, EvalResult};
use crate::progress::{Phase, Progress, ProgressSink};
use crate::prompts;

/// One golden question with its reference answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// File name the pair was generated from.
    pub source: String,
    pub question: String,
    pub answer: String,
}

/// The output of [`DatasetBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct GoldenDataset {
    pub samples: Vec<Sample>,
    /// Pairs actually produced.
    pub processed: usize,
    /// `file_count * pairs_per_doc`.
    pub expected_total: usize,
}

#[derive(Serialize)]
struct DatasetFile<'a> {
    samples: &'a [Sample],
}

impl GoldenDataset {
    /// Write `{"samples": [...]}` as pretty JSON.
    pub fn persist(&self, path: &Path) -> EvalResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_string_pretty(&DatasetFile {
            samples: &self.samples,
        })?;
        body.push('\n');
        std::fs::write(path, body)?;
        info!(path = %path.display(), samples = self.samples.len(), "Golden dataset written");
        Ok(())
    }
}

/// Read a document as UTF-8, falling back to Latin-1. Returns `None` for
/// unreadable or blank files.
pub fn read_document(path: &Path) -> Option<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Unable to read document");
            return None;
        }
    };
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Keep documents within `limit` characters: the first half, a `\n...\n`
/// marker, then the last half.
pub fn truncate_middle(text: &str, limit: usize) -> String {
    let len = text.chars().count();
    if len <= limit {
        return text.to_string();
    }
    let half = limit / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!("{head}\n...\n{tail}")
}

/// Every regular file below `dir`, in sorted path order.
pub fn list_documents(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Builds golden datasets with a completion provider.
pub struct DatasetBuilder<'a> {
    provider: &'a dyn CompletionProvider,
    model: String,
    retry: RetryPolicy,
    context_char_limit: usize,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(
        provider: &'a dyn CompletionProvider,
        model: impl Into<String>,
        retry: RetryPolicy,
        context_char_limit: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            retry,
            context_char_limit,
        }
    }

    /// Ask the model for `num_pairs` pairs about one document.
    pub async fn generate_pairs(
        &self,
        content: &str,
        file_name: &str,
        num_pairs: usize,
    ) -> Result<Vec<ragprobe_core::QaPair>, ragprobe_core::LlmError> {
        let messages = vec![
            ChatMessage::system(prompts::dataset_system(num_pairs)),
            ChatMessage::user(prompts::dataset_user(file_name, content)),
        ];
        let completion = with_retry(&self.retry, "generate_pairs", || {
            self.provider.complete(CompletionRequest::new(
                self.model.clone(),
                messages.clone(),
                Sampling::deterministic(),
            ))
        })
        .await?;

        let raw = completion.text();
        let pairs = parse_pairs(raw, num_pairs);
        if pairs.len() != num_pairs {
            warn!(
                file = file_name,
                got = pairs.len(),
                expected = num_pairs,
                raw = %preview(raw, WARN_PREVIEW_CHARS),
                "Pair count mismatch"
            );
        }
        Ok(pairs)
    }

    /// Build the dataset from every file below `data_dir`.
    ///
    /// A document whose generation still fails after retries contributes no
    /// samples; the run continues with the next file.
    pub async fn build(
        &self,
        data_dir: &Path,
        num_pairs: usize,
        progress: &dyn ProgressSink,
    ) -> EvalResult<GoldenDataset> {
        if !data_dir.is_dir() {
            return Err(EvalError::DataDirNotFound(data_dir.to_path_buf()));
        }

        let files = list_documents(data_dir);
        let expected_total = files.len() * num_pairs;
        info!(
            data_dir = %data_dir.display(),
            files = files.len(),
            num_pairs,
            "Building golden dataset"
        );

        let mut dataset = GoldenDataset {
            expected_total,
            ..Default::default()
        };

        for (idx, path) in files.iter().enumerate() {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let Some(raw) = read_document(path) else {
                warn!(file = %file_name, "Skipping unreadable document");
                continue;
            };
            let content = truncate_middle(&raw, self.context_char_limit);
            info!(
                i = idx + 1,
                of = files.len(),
                file = %file_name,
                len_raw = raw.chars().count(),
                len_trunc = content.chars().count(),
                "Generating pairs"
            );

            let started = Instant::now();
            let pairs = match self.generate_pairs(&content, &file_name, num_pairs).await {
                Ok(pairs) => pairs,
                Err(e) => {
                    error!(file = %file_name, error = %e, "Pair generation failed; skipping document");
                    continue;
                }
            };
            info!(
                file = %file_name,
                pairs = pairs.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pairs generated"
            );

            for pair in pairs {
                dataset.samples.push(Sample {
                    source: file_name.clone(),
                    question: pair.question,
                    answer: pair.answer,
                });
                dataset.processed += 1;
                if expected_total > 0 {
                    progress.report(Progress::new(dataset.processed, expected_total, Phase::Dataset));
                }
            }
        }

        info!(samples = dataset.samples.len(), "Golden dataset built");
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use pretty_assertions::assert_eq;
    use ragprobe_core::{LlmError, MockCompletionProvider};
    use std::sync::{Arc, Mutex};

    fn builder(provider: &MockCompletionProvider) -> DatasetBuilder<'_> {
        DatasetBuilder::new(provider, "gpt-4o-mini", RetryPolicy::once(), 6000)
    }

    #[test]
    fn test_truncate_middle() {
        assert_eq!(truncate_middle("short", 10), "short");
        assert_eq!(truncate_middle("abcdefghij", 4), "ab\n...\nij");
    }

    #[test]
    fn test_truncate_middle_multibyte() {
        let text = "ééééééé";
        assert_eq!(truncate_middle(text, 2), "é\n...\né");
    }

    #[test]
    fn test_read_document_latin1_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, [b'C', b'a', b'f', 0xE9]).unwrap();
        assert_eq!(read_document(&path).unwrap(), "Café");
    }

    #[test]
    fn test_read_document_blank_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "  \n ").unwrap();
        assert!(read_document(&path).is_none());
    }

    #[test]
    fn test_list_documents_is_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("nested").join("c.txt"), "c").unwrap();
        let names: Vec<String> = list_documents(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_build_single_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alien.txt"), "Alien (1979) was directed by Ridley Scott.").unwrap();

        let provider = MockCompletionProvider::new();
        provider.queue_text(
            r#"{"pairs":[{"question":"Who directed Alien?","answer":"Ridley Scott"},{"question":"When was Alien released?","answer":"1979"}]}"#,
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink = move |p: Progress| sink_seen.lock().unwrap().push(p);

        let dataset = builder(&provider).build(dir.path(), 2, &sink).await.unwrap();
        assert_eq!(dataset.samples.len(), 2);
        assert_eq!(dataset.processed, 2);
        assert_eq!(dataset.expected_total, 2);
        assert_eq!(dataset.samples[0].source, "alien.txt");
        assert_eq!(dataset.samples[1].answer, "1979");

        let steps: Vec<(usize, usize)> = seen.lock().unwrap().iter().map(|p| (p.i, p.of)).collect();
        assert_eq!(steps, vec![(1, 2), (2, 2)]);

        let request = &provider.requests()[0];
        assert_eq!(request.sampling.temperature, 0.0);
        assert!(request.messages[1].content.contains("Source file: alien.txt"));
    }

    #[tokio::test]
    async fn test_build_accepts_count_mismatch_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "first").unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();

        let provider = MockCompletionProvider::new();
        provider.queue_text(r#"{"pairs":[{"question":"q","answer":"a"}]}"#);
        provider.queue_error(LlmError::Timeout { timeout_secs: 1 });

        let dataset = builder(&provider).build(dir.path(), 3, &NoProgress).await.unwrap();
        assert_eq!(dataset.samples.len(), 1);
        assert_eq!(dataset.expected_total, 6);
    }

    #[tokio::test]
    async fn test_build_missing_dir_is_fatal() {
        let provider = MockCompletionProvider::new();
        let err = builder(&provider)
            .build(Path::new("/definitely/not/here"), 2, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::DataDirNotFound(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_persist_writes_samples_object() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = GoldenDataset {
            samples: vec![Sample {
                source: "a.txt".into(),
                question: "q".into(),
                answer: "a".into(),
            }],
            processed: 1,
            expected_total: 1,
        };
        let path = dir.path().join("out").join("golden_dataset_x.json");
        dataset.persist(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["samples"][0]["question"], "q");
    }
}
