// Scripted engine for tests
//
// Every `stream_chat` call pops the next queued receiver; tests feed or close
// the matching sender to control delta timing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::{DeltaStream, Engine, EngineError, EngineLoader, EngineResult, ProgressSink};
use crate::models::{Capability, CompletionChunk, CompletionRequest, ModelInfo, Progress};

pub(crate) type ScriptSender = mpsc::UnboundedSender<EngineResult<CompletionChunk>>;
pub(crate) type ScriptReceiver = mpsc::UnboundedReceiver<EngineResult<CompletionChunk>>;

/// Receiver pre-filled with `items` and already closed
pub(crate) fn scripted_stream(items: Vec<EngineResult<CompletionChunk>>) -> ScriptReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    for item in items {
        let _ = tx.send(item);
    }
    rx
}

/// Open stream the test drives by hand
pub(crate) fn open_stream() -> (ScriptSender, ScriptReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Default)]
pub(crate) struct ScriptedEngine {
    streams: Mutex<VecDeque<ScriptReceiver>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedEngine {
    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn stream_chat(&self, request: CompletionRequest) -> EngineResult<DeltaStream> {
        self.requests.lock().unwrap().push(request);
        let mut rx = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::ApiError("no scripted stream queued".to_string()))?;

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }

    fn gpu_vendor(&self) -> Option<String> {
        Some("scripted".to_string())
    }
}

pub(crate) struct ScriptedLoader {
    engine: Arc<ScriptedEngine>,
    progress: Vec<f64>,
    failure: Option<EngineError>,
    capability: Capability,
    models: Vec<ModelInfo>,
    gate: Option<Arc<Notify>>,
    loads: AtomicUsize,
}

impl ScriptedLoader {
    pub(crate) fn new() -> Self {
        Self {
            engine: Arc::new(ScriptedEngine::default()),
            progress: vec![0.0, 1.0],
            failure: None,
            capability: Capability::Supported {
                gpu_vendor: Some("scripted".to_string()),
            },
            models: vec![
                ModelInfo {
                    id: "tiny".to_string(),
                    label: "Tiny".to_string(),
                },
                ModelInfo {
                    id: "small".to_string(),
                    label: "Small".to_string(),
                },
            ],
            gate: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_progress(mut self, fractions: Vec<f64>) -> Self {
        self.progress = fractions;
        self
    }

    pub(crate) fn failing_with(mut self, err: EngineError) -> Self {
        self.failure = Some(err);
        self
    }

    pub(crate) fn unsupported(mut self, reason: &str) -> Self {
        self.capability = Capability::Unsupported {
            reason: reason.to_string(),
        };
        self
    }

    /// Loads block after reporting progress until the gate is notified
    pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn engine(&self) -> Arc<ScriptedEngine> {
        self.engine.clone()
    }

    pub(crate) fn push_stream(&self, rx: ScriptReceiver) {
        self.engine.streams.lock().unwrap().push_back(rx);
    }

    pub(crate) fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLoader for ScriptedLoader {
    fn name(&self) -> &str {
        "scripted"
    }

    fn probe(&self) -> Capability {
        self.capability.clone()
    }

    async fn load_model(&self, model: &str, progress: ProgressSink) -> EngineResult<Arc<dyn Engine>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        for (step, fraction) in self.progress.iter().enumerate() {
            progress(Progress::new(
                *fraction,
                format!("Loading {} ({})", model, step),
                step as u64,
            ));
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(self.engine.clone())
    }

    async fn list_models(&self) -> EngineResult<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }
}
