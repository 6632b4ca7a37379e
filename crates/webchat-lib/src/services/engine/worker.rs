// Engine Worker Bridge
// Feature: Browser Chat (001-chat-session)
//
// Hosts the engine inside a dedicated background task and talks to it only
// through typed channels:
// - Load progress / ready / failure events
// - Generate requests with a per-request delta channel
// - Worker replacement on model change

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{DeltaStream, Engine, EngineError, EngineResult, ProgressSink, SharedEngineLoader};
use crate::models::{CompletionChunk, CompletionRequest, GenerationParameters, Message, Progress};
use crate::utils::lock_unpoisoned;

/// Pending generate requests per worker
const REQUEST_BUFFER: usize = 4;

/// Chunks buffered between the worker and the consumer
const DELTA_BUFFER: usize = 64;

/// Request sent to the worker
enum WorkerRequest {
    Generate {
        request: CompletionRequest,
        deltas: mpsc::Sender<WorkerDelta>,
    },
}

/// Load lifecycle events sent back from the worker
enum WorkerEvent {
    Progress(Progress),
    Ready { gpu_vendor: Option<String> },
    Failed(EngineError),
}

/// Per-generation message sent back from the worker
enum WorkerDelta {
    Chunk(CompletionChunk),
    Failed(EngineError),
    Done,
}

/// The single live worker of a bridge
struct WorkerSlot {
    id: String,
    model: String,
    task: JoinHandle<()>,
}

/// Handle to a loaded engine living inside a worker
#[derive(Clone)]
pub struct EngineHandle {
    worker_id: String,
    model: String,
    gpu_vendor: Option<String>,
    requests: mpsc::Sender<WorkerRequest>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("worker_id", &self.worker_id)
            .field("model", &self.model)
            .field("gpu_vendor", &self.gpu_vendor)
            .finish()
    }
}

impl EngineHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn gpu_vendor(&self) -> Option<&str> {
        self.gpu_vendor.as_deref()
    }

    /// Ask the worker for a streamed completion
    pub async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParameters,
    ) -> EngineResult<DeltaStream> {
        let (deltas_tx, mut deltas_rx) = mpsc::channel(DELTA_BUFFER);
        let request = CompletionRequest::streaming(messages, params);

        self.requests
            .send(WorkerRequest::Generate {
                request,
                deltas: deltas_tx,
            })
            .await
            .map_err(|_| EngineError::WorkerGone)?;

        Ok(Box::pin(async_stream::stream! {
            loop {
                match deltas_rx.recv().await {
                    Some(WorkerDelta::Chunk(chunk)) => yield Ok(chunk),
                    Some(WorkerDelta::Failed(err)) => {
                        yield Err(err);
                        break;
                    }
                    Some(WorkerDelta::Done) => break,
                    // Channel closed without a terminal message: the worker was torn down
                    None => {
                        yield Err(EngineError::WorkerGone);
                        break;
                    }
                }
            }
        }))
    }
}

/// Owns exactly one engine worker at a time
pub struct WorkerBridge {
    loader: SharedEngineLoader,
    slot: Mutex<Option<WorkerSlot>>,
    engine: Mutex<Option<EngineHandle>>,
}

impl WorkerBridge {
    pub fn new(loader: SharedEngineLoader) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
            engine: Mutex::new(None),
        }
    }

    pub fn loader(&self) -> &SharedEngineLoader {
        &self.loader
    }

    /// Spawn a worker for `model` and wait until it reports ready.
    ///
    /// Any previous worker is discarded first. `on_progress` receives every
    /// progress event in arrival order; regressions are passed through as-is.
    pub async fn load<F>(&self, model: &str, on_progress: F) -> EngineResult<EngineHandle>
    where
        F: Fn(Progress) + Send,
    {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        let worker_id = format!("worker_{}", Uuid::new_v4().simple());

        log::info!(
            "[{}] spawning {} for model {}",
            self.loader.name(),
            worker_id,
            model
        );

        let task = tokio::spawn(run_worker(
            self.loader.clone(),
            model.to_string(),
            events_tx,
            requests_rx,
        ));
        self.replace_slot(Some(WorkerSlot {
            id: worker_id.clone(),
            model: model.to_string(),
            task,
        }));

        while let Some(event) = events_rx.recv().await {
            match event {
                WorkerEvent::Progress(progress) => on_progress(progress),
                WorkerEvent::Ready { gpu_vendor } => {
                    let handle = EngineHandle {
                        worker_id: worker_id.clone(),
                        model: model.to_string(),
                        gpu_vendor,
                        requests: requests_tx,
                    };
                    if !self.owns_slot(&worker_id) {
                        return Err(EngineError::WorkerGone);
                    }
                    *lock_unpoisoned(&self.engine) = Some(handle.clone());
                    log::info!("[{}] {} ready", self.loader.name(), worker_id);
                    return Ok(handle);
                }
                WorkerEvent::Failed(err) => {
                    log::error!("[{}] {} failed to load: {}", self.loader.name(), worker_id, err);
                    if self.owns_slot(&worker_id) {
                        self.replace_slot(None);
                    }
                    return Err(err);
                }
            }
        }

        // Event channel closed before ready: a newer load aborted this worker
        Err(EngineError::WorkerGone)
    }

    /// Stream a completion from the loaded engine
    pub async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParameters,
    ) -> EngineResult<DeltaStream> {
        let handle = self.engine().ok_or(EngineError::NotLoaded)?;
        handle.generate(messages, params).await
    }

    /// Discard the current worker, if any
    pub fn unload(&self) {
        self.replace_slot(None);
    }

    /// Handle of the ready engine, if any
    pub fn engine(&self) -> Option<EngineHandle> {
        lock_unpoisoned(&self.engine).clone()
    }

    /// Id of the live worker (loading or ready)
    pub fn worker_id(&self) -> Option<String> {
        lock_unpoisoned(&self.slot).as_ref().map(|slot| slot.id.clone())
    }

    /// Model of the live worker (loading or ready)
    pub fn current_model(&self) -> Option<String> {
        lock_unpoisoned(&self.slot)
            .as_ref()
            .map(|slot| slot.model.clone())
    }

    fn owns_slot(&self, worker_id: &str) -> bool {
        lock_unpoisoned(&self.slot)
            .as_ref()
            .is_some_and(|slot| slot.id == worker_id)
    }

    fn replace_slot(&self, next: Option<WorkerSlot>) {
        let previous = {
            let mut slot = lock_unpoisoned(&self.slot);
            std::mem::replace(&mut *slot, next)
        };
        *lock_unpoisoned(&self.engine) = None;

        if let Some(previous) = previous {
            log::info!("[{}] discarding {}", self.loader.name(), previous.id);
            previous.task.abort();
        }
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        if let Some(slot) = lock_unpoisoned(&self.slot).take() {
            slot.task.abort();
        }
    }
}

async fn run_worker(
    loader: SharedEngineLoader,
    model: String,
    events: mpsc::UnboundedSender<WorkerEvent>,
    mut requests: mpsc::Receiver<WorkerRequest>,
) {
    let progress_events = events.clone();
    let sink: ProgressSink = Arc::new(move |progress: Progress| {
        let _ = progress_events.send(WorkerEvent::Progress(progress));
    });

    let engine = match loader.load_model(&model, sink).await {
        Ok(engine) => engine,
        Err(err) => {
            let _ = events.send(WorkerEvent::Failed(err));
            return;
        }
    };

    if events
        .send(WorkerEvent::Ready {
            gpu_vendor: engine.gpu_vendor(),
        })
        .is_err()
    {
        log::debug!("nobody is waiting for model {}, worker exiting", model);
        return;
    }
    drop(events);

    while let Some(request) = requests.recv().await {
        match request {
            WorkerRequest::Generate { request, deltas } => {
                forward_generation(engine.as_ref(), request, deltas).await;
            }
        }
    }

    log::debug!("worker for model {} shutting down", model);
}

async fn forward_generation(
    engine: &dyn Engine,
    request: CompletionRequest,
    deltas: mpsc::Sender<WorkerDelta>,
) {
    let mut stream = match engine.stream_chat(request).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = deltas.send(WorkerDelta::Failed(err)).await;
            return;
        }
    };

    while let Some(item) = stream.next().await {
        let (message, terminal) = match item {
            Ok(chunk) => (WorkerDelta::Chunk(chunk), false),
            Err(err) => (WorkerDelta::Failed(err), true),
        };
        if deltas.send(message).await.is_err() {
            // Consumer stopped listening (cancelled); abandon the rest
            log::debug!("delta receiver dropped, abandoning generation");
            return;
        }
        if terminal {
            return;
        }
    }

    let _ = deltas.send(WorkerDelta::Done).await;
}
