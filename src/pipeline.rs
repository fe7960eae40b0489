//! Batch-parallel annotation pipeline.
//!
//! Work items are processed in fixed-size batches. Within a batch every
//! dispatched item runs as its own spawned task and reports back through a
//! dedicated one-shot channel; the orchestrator owns the aggregate and is the
//! only writer. Batches are strictly sequential: the next batch is not
//! dispatched until every unit of the current one has produced an outcome.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::client::CompletionBackend;
use crate::model::{AggregateResult, Annotation, FailureCause, FailureRecord, WorkItem};
use crate::parse;
use crate::prompt::{self, PromptVariant};
use crate::util;
use crate::workitems;

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Corpus root that work-item paths are resolved against.
    pub root: PathBuf,
    /// Items analyzed concurrently; also the unit of progress reporting.
    pub batch_size: usize,
    pub variant: PromptVariant,
}

impl PipelineOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            variant: PromptVariant::default(),
        }
    }
}

/// Outcome slot for one work item, keyed to its position within the batch.
/// Not-found items are decided at dispatch time and never reach the network.
enum Slot {
    Skipped(FailureRecord),
    Dispatched {
        identifier: String,
        outcome: oneshot::Receiver<Result<Annotation, FailureRecord>>,
    },
}

/// Run the full pipeline over `items` and return the finalized aggregate.
///
/// Every work item yields exactly one outcome: an annotation or a failure
/// record. Per-item failures never abort the run and never block siblings.
pub async fn run(
    backend: Arc<dyn CompletionBackend>,
    items: &[WorkItem],
    options: &PipelineOptions,
) -> AggregateResult {
    let mut aggregate = AggregateResult::default();
    let batch_size = options.batch_size.max(1);

    for (batch_idx, batch) in items.chunks(batch_size).enumerate() {
        println!("Processing batch {}", batch_idx + 1);
        let start = Instant::now();

        let slots = dispatch_batch(&backend, batch, options);
        collect_batch(slots, &mut aggregate).await;

        println!(
            "Batch {} processed in {:.2} seconds",
            batch_idx + 1,
            start.elapsed().as_secs_f64()
        );
        println!("{}", "-".repeat(20));
    }

    aggregate
}

/// Dispatch one batch: load each item's content synchronously, skip the ones
/// that are missing, and spawn a unit of work for the rest. A skipped item
/// leaves the batch under-subscribed rather than pulling work forward.
fn dispatch_batch(
    backend: &Arc<dyn CompletionBackend>,
    batch: &[WorkItem],
    options: &PipelineOptions,
) -> Vec<Slot> {
    batch
        .iter()
        .map(|item| {
            let Some(content) = workitems::read_item_content(&options.root, &item.filename)
            else {
                return Slot::Skipped(FailureRecord::new(
                    &item.filename,
                    FailureCause::NotFound,
                ));
            };

            let rendered = prompt::render(options.variant, &item.filename, &content);
            let (tx, rx) = oneshot::channel();
            let backend = Arc::clone(backend);
            let identifier = item.filename.clone();

            tokio::spawn(async move {
                // A panicking unit must not take the orchestrator or its
                // siblings with it; it becomes this item's failure record.
                let outcome =
                    match AssertUnwindSafe(annotate_one(backend.as_ref(), &identifier, &rendered))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            Err(FailureRecord::new(&identifier, FailureCause::CallFailed))
                        }
                    };
                let _ = tx.send(outcome);
            });

            Slot::Dispatched {
                identifier: item.filename.clone(),
                outcome: rx,
            }
        })
        .collect()
}

/// One unit of work: completion call, then response parse.
async fn annotate_one(
    backend: &dyn CompletionBackend,
    identifier: &str,
    rendered: &str,
) -> Result<Annotation, FailureRecord> {
    let raw = match backend.complete(rendered).await {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("  Warning: completion call for {} failed: {:#}", identifier, err);
            return Err(FailureRecord::new(identifier, FailureCause::CallFailed));
        }
    };

    match parse::parse_response(identifier, &raw) {
        Ok(annotation) => Ok(annotation),
        Err(err) => {
            eprintln!("  Warning: response for {} did not parse: {:#}", identifier, err);
            Err(FailureRecord::new(identifier, FailureCause::ParseFailed))
        }
    }
}

/// Await every unit of the batch and fold outcomes into the aggregate in
/// dispatch order. A dropped channel (the unit died before reporting) is
/// recorded as a call failure so the item still gets exactly one outcome.
async fn collect_batch(slots: Vec<Slot>, aggregate: &mut AggregateResult) {
    for slot in slots {
        match slot {
            Slot::Skipped(failure) => aggregate.failures.push(failure),
            Slot::Dispatched {
                identifier,
                outcome,
            } => match outcome.await {
                Ok(Ok(annotation)) => aggregate.annotations.push(annotation),
                Ok(Err(failure)) => aggregate.failures.push(failure),
                Err(_) => aggregate
                    .failures
                    .push(FailureRecord::new(identifier, FailureCause::CallFailed)),
            },
        }
    }
}

/// Persist the aggregate artifact: the ordered array of per-file annotations,
/// written once, atomically, after the final batch.
pub fn write_aggregate(
    aggregate: &AggregateResult,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&aggregate.annotations)?;
    util::write_atomic(path, &json)
}

/// Print the end-of-run failure summary. All three failure kinds are
/// reported, with the missing-file list spelled out.
pub fn print_summary(aggregate: &AggregateResult, output: &std::path::Path) {
    println!("Saved service extraction results to {}", output.display());

    let missing = aggregate.missing_files();
    println!("{} files not found", missing.len());
    println!("Files not found: {:?}", missing);
    println!(
        "{} completion calls failed",
        aggregate.failure_count(FailureCause::CallFailed)
    );
    println!(
        "{} responses failed to parse",
        aggregate.failure_count(FailureCause::ParseFailed)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const EMPTY_ANSWER: &str = "<think>ok</think>{\"detected_data_sink_services\":[]}";

    /// Stub backend with a canned per-prompt response and call recording.
    struct StubBackend {
        calls: AtomicUsize,
        seen_prompts: Mutex<Vec<String>>,
        respond: Box<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>,
    }

    impl StubBackend {
        fn returning(text: &'static str) -> Self {
            Self::with(move |_| Ok(text.to_string()))
        }

        fn with<F>(respond: F) -> Self
        where
            F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
        {
            Self {
                calls: AtomicUsize::new(0),
                seen_prompts: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CompletionBackend for StubBackend {
        fn complete<'a>(
            &'a self,
            prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.seen_prompts.lock().unwrap().push(prompt.to_string());
                (self.respond)(prompt)
            })
        }
    }

    fn corpus_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    fn items(names: &[&str]) -> Vec<WorkItem> {
        names.iter().map(|n| WorkItem::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_every_item_yields_exactly_one_outcome() {
        let corpus = corpus_with(&[("a.ts", "x"), ("b.ts", "y")]);
        let backend = Arc::new(StubBackend::with(|prompt| {
            if prompt.contains("a.ts") {
                Ok(EMPTY_ANSWER.to_string())
            } else {
                Ok("no marker at all".to_string())
            }
        }));
        let work = items(&["a.ts", "b.ts", "missing.ts"]);

        let aggregate = run(backend, &work, &PipelineOptions::new(corpus.path())).await;
        assert_eq!(
            aggregate.annotations.len() + aggregate.failures.len(),
            work.len()
        );
        assert_eq!(aggregate.annotations.len(), 1);
        assert_eq!(aggregate.failure_count(FailureCause::ParseFailed), 1);
        assert_eq!(aggregate.failure_count(FailureCause::NotFound), 1);
    }

    #[tokio::test]
    async fn test_missing_file_makes_no_network_call() {
        let corpus = corpus_with(&[("a.ts", "content")]);
        let backend = Arc::new(StubBackend::returning(EMPTY_ANSWER));
        let work = items(&["a.ts", "missing.ts"]);

        let aggregate = run(
            Arc::clone(&backend) as Arc<dyn CompletionBackend>,
            &work,
            &PipelineOptions::new(corpus.path()),
        )
        .await;

        assert_eq!(backend.call_count(), 1);
        assert_eq!(aggregate.annotations.len(), 1);
        assert_eq!(aggregate.annotations[0].filename, "a.ts");
        assert_eq!(
            aggregate.failures,
            vec![FailureRecord::new("missing.ts", FailureCause::NotFound)]
        );
    }

    #[tokio::test]
    async fn test_batch_boundaries_and_barrier() {
        let names: Vec<String> = (0..23).map(|i| format!("f{:02}.ts", i)).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let files: Vec<(&str, &str)> = name_refs.iter().map(|n| (*n, "x")).collect();
        let corpus = corpus_with(&files);
        let backend = Arc::new(StubBackend::returning(EMPTY_ANSWER));
        let work = items(&name_refs);

        let aggregate = run(
            Arc::clone(&backend) as Arc<dyn CompletionBackend>,
            &work,
            &PipelineOptions::new(corpus.path()),
        )
        .await;

        assert_eq!(aggregate.annotations.len(), 23);
        assert_eq!(backend.call_count(), 23);

        // Batch k+1 dispatch starts strictly after batch k's outcomes are
        // recorded, so the first 10 calls must all come from the first 10
        // items, the next 10 from the second slice, the last 3 from the tail.
        let seen = backend.seen_prompts.lock().unwrap();
        for (call_idx, prompt) in seen.iter().enumerate() {
            let batch = call_idx / 10;
            let batch_names = &name_refs[batch * 10..((batch + 1) * 10).min(23)];
            assert!(
                batch_names.iter().any(|n| prompt.contains(n)),
                "call {} did not come from batch {}",
                call_idx,
                batch
            );
        }
    }

    #[tokio::test]
    async fn test_successes_keep_batch_dispatch_order() {
        let corpus = corpus_with(&[("a.ts", "1"), ("b.ts", "2"), ("c.ts", "3")]);
        let backend = Arc::new(StubBackend::returning(EMPTY_ANSWER));
        let work = items(&["a.ts", "b.ts", "c.ts"]);

        let mut options = PipelineOptions::new(corpus.path());
        options.batch_size = 2;
        let aggregate = run(backend, &work, &options).await;

        let order: Vec<&str> = aggregate
            .annotations
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(order, vec!["a.ts", "b.ts", "c.ts"]);
    }

    #[tokio::test]
    async fn test_rerun_is_byte_identical() {
        let corpus = corpus_with(&[("a.ts", "1"), ("b.ts", "2")]);
        let work = items(&["a.ts", "b.ts", "gone.ts"]);
        let options = PipelineOptions::new(corpus.path());

        let mut snapshots = Vec::new();
        for _ in 0..2 {
            let backend = Arc::new(StubBackend::returning(
                "<think>R</think>{\"detected_data_sink_services\":[{\"service\":\"db\",\"evidence\":\"e\",\"reasoning\":\"r\"}]}",
            ));
            let aggregate = run(backend, &work, &options).await;
            snapshots.push(serde_json::to_string(&aggregate.annotations).unwrap());
        }
        assert_eq!(snapshots[0], snapshots[1]);
    }

    #[tokio::test]
    async fn test_call_failure_does_not_block_siblings() {
        let corpus = corpus_with(&[("ok.ts", "1"), ("bad.ts", "2")]);
        let backend = Arc::new(StubBackend::with(|prompt| {
            if prompt.contains("bad.ts") {
                anyhow::bail!("connection reset")
            }
            Ok(EMPTY_ANSWER.to_string())
        }));
        let work = items(&["ok.ts", "bad.ts"]);

        let aggregate = run(backend, &work, &PipelineOptions::new(corpus.path())).await;
        assert_eq!(aggregate.annotations.len(), 1);
        assert_eq!(aggregate.annotations[0].filename, "ok.ts");
        assert_eq!(
            aggregate.failures,
            vec![FailureRecord::new("bad.ts", FailureCause::CallFailed)]
        );
    }

    #[tokio::test]
    async fn test_panicking_unit_is_isolated() {
        let corpus = corpus_with(&[("ok.ts", "1"), ("boom.ts", "2")]);
        let backend = Arc::new(StubBackend::with(|prompt| {
            if prompt.contains("boom.ts") {
                panic!("unit blew up");
            }
            Ok(EMPTY_ANSWER.to_string())
        }));
        let work = items(&["ok.ts", "boom.ts"]);

        let aggregate = run(backend, &work, &PipelineOptions::new(corpus.path())).await;
        assert_eq!(aggregate.annotations.len(), 1);
        assert_eq!(aggregate.failure_count(FailureCause::CallFailed), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let corpus = corpus_with(&[("a.ts", "db.save(x);")]);
        let backend = Arc::new(StubBackend::returning(
            "<think>uses db</think>{\"detected_data_sink_services\":[{\"service\":\"db\",\"evidence\":\"db.save(x);\",\"reasoning\":\"persists x\"}]}",
        ));
        let work = items(&["a.ts", "missing.ts"]);

        let aggregate = run(backend, &work, &PipelineOptions::new(corpus.path())).await;

        assert_eq!(aggregate.annotations.len(), 1);
        let annotation = &aggregate.annotations[0];
        assert_eq!(annotation.filename, "a.ts");
        assert_eq!(annotation.reasoning, "uses db");
        assert_eq!(annotation.message.detected_data_sink_services[0].service, "db");
        assert_eq!(
            aggregate.failures,
            vec![FailureRecord::new("missing.ts", FailureCause::NotFound)]
        );
    }

    #[tokio::test]
    async fn test_write_aggregate_shape() {
        let corpus = corpus_with(&[("a.ts", "x")]);
        let backend = Arc::new(StubBackend::returning(EMPTY_ANSWER));
        let work = items(&["a.ts"]);
        let aggregate = run(backend, &work, &PipelineOptions::new(corpus.path())).await;

        let out = corpus.path().join("service_extraction.json");
        write_aggregate(&aggregate, &out).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        let entries = written.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["filename"], "a.ts");
        assert!(entries[0]["message"]["detected_data_sink_services"].is_array());
        assert!(entries[0]["reasoning"].is_string());
    }
}
