// Streaming Consumer
// Feature: Browser Chat (001-chat-session)
//
// Drives one generation from request to terminal state. Handles:
// - Placeholder assistant message before the first delta
// - Delta application in arrival order
// - Cancellation raced against the next delta
// - Optional idle timeout between deltas

use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::models::{CompletionChunk, GenerationParameters, Message};
use crate::services::engine::{DeltaStream, EngineError, EngineHandle, EngineResult};

/// How a generation ended
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Engine finished the stream
    Completed,
    /// Stopped by the caller; partial reply rolled back
    Cancelled,
    /// Engine fault; partial reply retained
    Failed(EngineError),
    /// Transcript was cleared underneath the generation
    Detached,
}

/// Receiver of a generation's writes. Every call is checked against the
/// current generation id so stale generations cannot write.
pub(crate) trait GenerationSink: Send + Sync {
    /// Append the assistant placeholder; false when `id` is no longer current
    fn begin(&self, id: u64) -> bool;

    /// Apply one chunk; false when `id` is no longer allowed to write
    fn apply(&self, id: u64, chunk: &CompletionChunk) -> bool;

    /// Settle the generation
    fn finish(&self, id: u64, outcome: &GenerationOutcome);
}

/// Everything a consumer needs, captured at submit
pub(crate) struct GenerationJob {
    pub id: u64,
    pub token: CancellationToken,
    pub engine: EngineHandle,
    pub messages: Vec<Message>,
    pub params: GenerationParameters,
    pub idle_timeout: Option<Duration>,
}

async fn next_delta(
    stream: &mut DeltaStream,
    idle_timeout: Option<Duration>,
) -> EngineResult<Option<EngineResult<CompletionChunk>>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| EngineError::Timeout(limit)),
        None => Ok(stream.next().await),
    }
}

async fn drive<S: GenerationSink>(sink: &S, job: &GenerationJob) -> GenerationOutcome {
    let mut stream = tokio::select! {
        biased;
        _ = job.token.cancelled() => return GenerationOutcome::Cancelled,
        result = job.engine.generate(&job.messages, &job.params) => match result {
            Ok(stream) => stream,
            Err(err) => return GenerationOutcome::Failed(err),
        },
    };

    if !sink.begin(job.id) {
        return GenerationOutcome::Detached;
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = job.token.cancelled() => return GenerationOutcome::Cancelled,
            next = next_delta(&mut stream, job.idle_timeout) => next,
        };

        match next {
            Ok(Some(Ok(chunk))) => {
                if job.token.is_cancelled() {
                    return GenerationOutcome::Cancelled;
                }
                if let Err(reason) = chunk.validate() {
                    return GenerationOutcome::Failed(EngineError::ParseError(reason));
                }
                if !sink.apply(job.id, &chunk) {
                    if job.token.is_cancelled() {
                        return GenerationOutcome::Cancelled;
                    }
                    return GenerationOutcome::Detached;
                }
            }
            Ok(Some(Err(err))) if err.is_cancellation() => return GenerationOutcome::Cancelled,
            Ok(Some(Err(err))) | Err(err) => return GenerationOutcome::Failed(err),
            Ok(None) => return GenerationOutcome::Completed,
        }
    }
}

/// Run a generation to its terminal state and report it to the sink.
/// The delta stream is dropped on return, which tells the worker to stop forwarding.
pub(crate) async fn consume<S: GenerationSink>(sink: &S, job: GenerationJob) -> GenerationOutcome {
    let outcome = drive(sink, &job).await;
    match &outcome {
        GenerationOutcome::Failed(err) => {
            log::error!("Generation {} failed: {}", job.id, err);
        }
        other => {
            log::debug!("Generation {} ended: {:?}", job.id, other);
        }
    }
    sink.finish(job.id, &outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Usage;
    use crate::services::engine::testing::{open_stream, scripted_stream, ScriptedLoader};
    use crate::services::engine::WorkerBridge;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        text: Mutex<String>,
        usage: Mutex<Option<Usage>>,
        begun: Mutex<bool>,
        finished: Mutex<Option<GenerationOutcome>>,
        reject_after: Option<usize>,
        applied: Mutex<usize>,
    }

    impl GenerationSink for RecordingSink {
        fn begin(&self, _id: u64) -> bool {
            *self.begun.lock().unwrap() = true;
            true
        }

        fn apply(&self, _id: u64, chunk: &CompletionChunk) -> bool {
            let mut applied = self.applied.lock().unwrap();
            if self.reject_after.is_some_and(|limit| *applied >= limit) {
                return false;
            }
            *applied += 1;
            if let Some(content) = chunk.content() {
                self.text.lock().unwrap().push_str(content);
            }
            if let Some(usage) = chunk.usage {
                *self.usage.lock().unwrap() = Some(usage);
            }
            true
        }

        fn finish(&self, _id: u64, outcome: &GenerationOutcome) {
            *self.finished.lock().unwrap() = Some(outcome.clone());
        }
    }

    async fn job_for(loader: Arc<ScriptedLoader>, idle_timeout: Option<Duration>) -> (WorkerBridge, GenerationJob) {
        let bridge = WorkerBridge::new(loader);
        let engine = bridge.load("tiny", |_| {}).await.unwrap();
        let job = GenerationJob {
            id: 1,
            token: CancellationToken::new(),
            engine,
            messages: vec![Message::user("hi")],
            params: GenerationParameters::default(),
            idle_timeout,
        };
        (bridge, job)
    }

    #[tokio::test]
    async fn test_consume_concatenates_deltas() {
        let loader = Arc::new(ScriptedLoader::new());
        loader.push_stream(scripted_stream(vec![
            Ok(CompletionChunk::text("The ")),
            Ok(CompletionChunk::text("answer")),
            Ok(CompletionChunk::text(" is 42")),
        ]));
        let (_bridge, job) = job_for(loader, None).await;
        let sink = RecordingSink::default();

        let outcome = consume(&sink, job).await;

        assert_eq!(outcome, GenerationOutcome::Completed);
        assert_eq!(*sink.text.lock().unwrap(), "The answer is 42");
        assert!(*sink.begun.lock().unwrap());
        assert_eq!(*sink.finished.lock().unwrap(), Some(GenerationOutcome::Completed));
    }

    #[tokio::test]
    async fn test_usage_is_overwritten() {
        let first = Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        };
        let second = Usage {
            prompt_tokens: 5,
            completion_tokens: 6,
            total_tokens: 11,
        };
        let loader = Arc::new(ScriptedLoader::new());
        loader.push_stream(scripted_stream(vec![
            Ok(CompletionChunk::text("a").with_usage(first)),
            Ok(CompletionChunk::usage(second)),
        ]));
        let (_bridge, job) = job_for(loader, None).await;
        let sink = RecordingSink::default();

        consume(&sink, job).await;
        assert_eq!(*sink.usage.lock().unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_cancel_stops_consuming() {
        let loader = Arc::new(ScriptedLoader::new());
        let (tx, rx) = open_stream();
        loader.push_stream(rx);
        let (_bridge, job) = job_for(loader, None).await;
        let token = job.token.clone();
        let sink = Arc::new(RecordingSink::default());

        let task = {
            let sink = sink.clone();
            tokio::spawn(async move { consume(sink.as_ref(), job).await })
        };

        tx.send(Ok(CompletionChunk::text("partial"))).unwrap();
        while sink.text.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        token.cancel();
        let _ = tx.send(Ok(CompletionChunk::text(" ignored")));

        assert_eq!(task.await.unwrap(), GenerationOutcome::Cancelled);
        assert_eq!(*sink.text.lock().unwrap(), "partial");
    }

    #[tokio::test]
    async fn test_engine_error_fails_generation() {
        let loader = Arc::new(ScriptedLoader::new());
        loader.push_stream(scripted_stream(vec![
            Ok(CompletionChunk::text("half")),
            Err(EngineError::ApiError("boom".to_string())),
        ]));
        let (_bridge, job) = job_for(loader, None).await;
        let sink = RecordingSink::default();

        let outcome = consume(&sink, job).await;
        assert_eq!(outcome, GenerationOutcome::Failed(EngineError::ApiError("boom".to_string())));
        assert_eq!(*sink.text.lock().unwrap(), "half");
    }

    #[tokio::test]
    async fn test_idle_timeout_fails_generation() {
        let loader = Arc::new(ScriptedLoader::new());
        let (tx, rx) = open_stream();
        tx.send(Ok(CompletionChunk::text("slow"))).unwrap();
        loader.push_stream(rx);
        let (_bridge, job) = job_for(loader, Some(Duration::from_millis(50))).await;
        let sink = RecordingSink::default();

        let outcome = consume(&sink, job).await;
        assert!(matches!(outcome, GenerationOutcome::Failed(EngineError::Timeout(_))));
        assert_eq!(*sink.text.lock().unwrap(), "slow");
        drop(tx);
    }

    #[tokio::test]
    async fn test_out_of_range_tool_call_index_fails_generation() {
        let oversized: CompletionChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":5000000,"function":{"name":"x"}}]}}]}"#,
        )
        .unwrap();
        let loader = Arc::new(ScriptedLoader::new());
        loader.push_stream(scripted_stream(vec![
            Ok(CompletionChunk::text("before")),
            Ok(oversized),
            Ok(CompletionChunk::text(" after")),
        ]));
        let (_bridge, job) = job_for(loader, None).await;
        let sink = RecordingSink::default();

        let outcome = consume(&sink, job).await;
        assert!(matches!(outcome, GenerationOutcome::Failed(EngineError::ParseError(_))));
        assert_eq!(*sink.text.lock().unwrap(), "before");
        assert_eq!(*sink.applied.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_write_detaches() {
        let loader = Arc::new(ScriptedLoader::new());
        loader.push_stream(scripted_stream(vec![
            Ok(CompletionChunk::text("one")),
            Ok(CompletionChunk::text("two")),
        ]));
        let (_bridge, job) = job_for(loader, None).await;
        let sink = RecordingSink {
            reject_after: Some(1),
            ..Default::default()
        };

        assert_eq!(consume(&sink, job).await, GenerationOutcome::Detached);
        assert_eq!(*sink.text.lock().unwrap(), "one");
    }
}
