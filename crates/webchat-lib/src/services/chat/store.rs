// Chat Session Store
// Feature: Browser Chat (001-chat-session)
//
// Single source of truth for the conversation, generation parameters and
// engine lifecycle. Handles:
// - Submit / stop / clear of generations
// - Model selection and engine (re)loading through the worker bridge
// - Persistence of the whitelisted session snapshot on every mutation
// - Change notification for observers

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::{SessionError, SessionResult};
use super::stream::{consume, GenerationJob, GenerationOutcome, GenerationSink};
use super::transcript::Transcript;
use crate::models::chat::check_range;
use crate::models::{
    Capability, CompletionChunk, GenerationParameters, Message, ModelInfo, Progress, Usage,
};
use crate::repositories::{SessionRepository, SessionSnapshot, SessionStorage};
use crate::services::engine::{
    EngineError, EngineHandle, OpenAICompatibleLoader, SharedEngineLoader, WorkerBridge,
};
use crate::utils::config::ChatConfig;
use crate::utils::database::open_database;
use crate::utils::lock_unpoisoned;

/// Largest logprobs count engines accept
const MAX_LOGPROBS: u32 = 20;

/// The generation currently allowed to write
struct ActiveGeneration {
    id: u64,
    token: CancellationToken,
    /// Transcript index of the in-progress assistant message
    assistant_index: Option<usize>,
    /// Set by `clear()`: the generation keeps running but may no longer write
    detached: bool,
}

struct ChatState {
    transcript: Transcript,
    input: String,
    params: GenerationParameters,
    is_generating: bool,
    is_ready: bool,
    is_loading: bool,
    engine: Option<EngineHandle>,
    usage: Option<Usage>,
    progress: Option<Progress>,
    capability: Capability,
    gpu_vendor: Option<String>,
    model_list: Vec<ModelInfo>,
    load_error: Option<String>,
    generation_error: Option<String>,
    active: Option<ActiveGeneration>,
    load_epoch: u64,
    next_generation_id: u64,
}

impl ChatState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.transcript.messages().to_vec(),
            input: self.input.clone(),
            parameters: self.params.clone(),
        }
    }

    fn view(&self) -> ChatView {
        ChatView {
            messages: self.transcript.messages().to_vec(),
            input: self.input.clone(),
            parameters: self.params.clone(),
            is_generating: self.is_generating,
            is_ready: self.is_ready,
            is_loading: self.is_loading,
            usage: self.usage,
            progress: self.progress.clone(),
            capability: self.capability.clone(),
            gpu_vendor: self.gpu_vendor.clone(),
            model_list: self.model_list.clone(),
            load_error: self.load_error.clone(),
            generation_error: self.generation_error.clone(),
            worker_id: self.engine.as_ref().map(|e| e.worker_id().to_string()),
        }
    }

    /// Whether generation `id` may still write to the transcript
    fn writable(&self, id: u64) -> Option<&ActiveGeneration> {
        self.active
            .as_ref()
            .filter(|active| active.id == id && !active.detached && !active.token.is_cancelled())
    }
}

/// Read-only copy of the store state for observers
#[derive(Debug, Clone, PartialEq)]
pub struct ChatView {
    pub messages: Vec<Message>,
    pub input: String,
    pub parameters: GenerationParameters,
    pub is_generating: bool,
    pub is_ready: bool,
    pub is_loading: bool,
    pub usage: Option<Usage>,
    pub progress: Option<Progress>,
    pub capability: Capability,
    pub gpu_vendor: Option<String>,
    pub model_list: Vec<ModelInfo>,
    pub load_error: Option<String>,
    pub generation_error: Option<String>,
    /// Worker behind the ready engine
    pub worker_id: Option<String>,
}

/// Handle to a submitted generation; may be ignored
pub struct GenerationTicket {
    id: u64,
    handle: JoinHandle<GenerationOutcome>,
}

impl GenerationTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the generation to settle
    pub async fn finished(self) -> GenerationOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Generation {} task ended abnormally: {}", self.id, e);
                GenerationOutcome::Failed(EngineError::WorkerGone)
            }
        }
    }
}

/// Handle to a background engine load
pub struct LoadTicket {
    handle: JoinHandle<SessionResult<()>>,
}

impl LoadTicket {
    /// Wait for the load to settle
    pub async fn finished(self) -> SessionResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Engine(EngineError::LoadFailed(e.to_string()))),
        }
    }
}

/// Timeouts applied by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreTimeouts {
    pub load: Option<Duration>,
    pub delta_idle: Option<Duration>,
}

impl From<&ChatConfig> for StoreTimeouts {
    fn from(config: &ChatConfig) -> Self {
        Self {
            load: config.load_timeout(),
            delta_idle: config.delta_idle_timeout(),
        }
    }
}

struct StoreInner {
    state: Mutex<ChatState>,
    bridge: WorkerBridge,
    storage: Arc<dyn SessionStorage>,
    timeouts: StoreTimeouts,
    revision: watch::Sender<u64>,
}

impl StoreInner {
    /// Apply `f` under the lock. When it returns `Some`, persist (if asked)
    /// and notify observers.
    fn commit<R>(&self, persist: bool, f: impl FnOnce(&mut ChatState) -> Option<R>) -> Option<R> {
        let result = {
            let mut state = lock_unpoisoned(&self.state);
            let result = f(&mut state)?;
            if persist {
                if let Err(e) = self.storage.save(&state.snapshot()) {
                    log::error!("Failed to persist chat session: {}", e);
                }
            }
            result
        };
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
        Some(result)
    }

    fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&lock_unpoisoned(&self.state))
    }
}

impl GenerationSink for StoreInner {
    fn begin(&self, id: u64) -> bool {
        self.commit(true, |state| {
            state.writable(id)?;
            let index = state.transcript.push_assistant_placeholder();
            if let Some(active) = state.active.as_mut() {
                active.assistant_index = Some(index);
            }
            Some(())
        })
        .is_some()
    }

    fn apply(&self, id: u64, chunk: &CompletionChunk) -> bool {
        self.commit(true, |state| {
            let index = state.writable(id)?.assistant_index?;
            if !state.transcript.append_chunk(index, chunk) {
                return None;
            }
            if let Some(usage) = chunk.usage {
                state.usage = Some(usage);
            }
            Some(())
        })
        .is_some()
    }

    fn finish(&self, id: u64, outcome: &GenerationOutcome) {
        self.commit(true, |state| {
            if state.active.as_ref().map(|active| active.id) != Some(id) {
                return None;
            }
            let active = state.active.take()?;
            state.is_generating = false;
            if active.detached {
                return Some(());
            }

            if let Some(index) = active.assistant_index {
                match outcome {
                    GenerationOutcome::Cancelled => {
                        state.transcript.rollback(index);
                    }
                    _ => state.transcript.finalize_tool_calls(index),
                }
            }
            if let GenerationOutcome::Failed(err) = outcome {
                state.generation_error = Some(err.to_string());
            }
            Some(())
        });
    }
}

/// Chat session store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

impl ChatStore {
    /// Build a store, restoring the persisted snapshot if there is one
    pub fn new(
        loader: SharedEngineLoader,
        storage: Arc<dyn SessionStorage>,
        defaults: GenerationParameters,
        timeouts: StoreTimeouts,
    ) -> Self {
        let snapshot = match storage.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Failed to restore chat session, starting fresh: {}", e);
                None
            }
        };

        let (transcript, input, params) = match snapshot {
            Some(snapshot) => {
                let params = match snapshot.parameters.validate() {
                    Ok(()) => snapshot.parameters,
                    Err(reason) => {
                        log::warn!("Discarding stored generation parameters: {}", reason);
                        defaults
                    }
                };
                let transcript = Transcript::restore(snapshot.messages, &params.system_prompt);
                (transcript, snapshot.input, params)
            }
            None => (Transcript::new(&defaults.system_prompt), String::new(), defaults),
        };

        let state = ChatState {
            transcript,
            input,
            params,
            is_generating: false,
            is_ready: false,
            is_loading: false,
            engine: None,
            usage: None,
            progress: None,
            capability: Capability::Unknown,
            gpu_vendor: None,
            model_list: Vec::new(),
            load_error: None,
            generation_error: None,
            active: None,
            load_epoch: 0,
            next_generation_id: 1,
        };

        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                bridge: WorkerBridge::new(loader),
                storage,
                timeouts,
                revision,
            }),
        }
    }

    /// Open a store from configuration: SQLite persistence and an
    /// OpenAI-compatible engine
    pub fn open(config: &ChatConfig) -> SessionResult<Self> {
        config.validate().map_err(SessionError::Config)?;
        let db = open_database(config.database_path.as_deref()).map_err(SessionError::Storage)?;
        let storage = Arc::new(SessionRepository::new(db, config.storage_key.clone()));
        let loader = Arc::new(OpenAICompatibleLoader::new(
            config.engine_endpoint.clone(),
            config.api_key.clone(),
        ));

        Ok(Self::new(
            loader,
            storage,
            config.initial_parameters(),
            StoreTimeouts::from(config),
        ))
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn view(&self) -> ChatView {
        self.inner.read(ChatState::view)
    }

    /// Receiver bumped on every state change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.read(|state| state.transcript.messages().to_vec())
    }

    pub fn is_generating(&self) -> bool {
        self.inner.read(|state| state.is_generating)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read(|state| state.is_ready)
    }

    pub fn usage(&self) -> Option<Usage> {
        self.inner.read(|state| state.usage)
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Send the current input. Silently does nothing (returns `None`) when the
    /// input is blank, a generation is running, or no engine is ready.
    pub fn submit(&self) -> Option<GenerationTicket> {
        let idle_timeout = self.inner.timeouts.delta_idle;
        let job = self.inner.commit(true, |state| {
            let text = state.input.trim().to_string();
            if text.is_empty() || state.is_generating || !state.is_ready {
                return None;
            }
            let engine = state.engine.clone()?;

            state.input.clear();
            state
                .transcript
                .begin_turn(&state.params.system_prompt, Message::user(text));

            let id = state.next_generation_id;
            state.next_generation_id += 1;
            let token = CancellationToken::new();
            state.active = Some(ActiveGeneration {
                id,
                token: token.clone(),
                assistant_index: None,
                detached: false,
            });
            state.is_generating = true;
            state.generation_error = None;

            Some(GenerationJob {
                id,
                token,
                engine,
                messages: state.transcript.messages().to_vec(),
                params: state.params.clone(),
                idle_timeout,
            })
        })?;

        let id = job.id;
        log::info!("Starting generation {} with model {}", id, job.params.model);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { consume(inner.as_ref(), job).await });

        Some(GenerationTicket { id, handle })
    }

    /// Cancel the running generation and drop its partial reply.
    /// Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        self.inner
            .commit(true, |state| {
                let active = state.active.take()?;
                active.token.cancel();
                if let (Some(index), false) = (active.assistant_index, active.detached) {
                    state.transcript.rollback(index);
                }
                state.is_generating = false;
                log::info!("Stopped generation {}", active.id);
                Some(())
            })
            .is_some()
    }

    /// Reset the transcript to the system prompt. A running generation keeps
    /// going but can no longer write.
    pub fn clear(&self) {
        self.inner.commit(true, |state| {
            state.transcript.reset(&state.params.system_prompt);
            state.usage = None;
            state.input.clear();
            state.generation_error = None;
            if let Some(active) = state.active.as_mut() {
                active.detached = true;
                active.assistant_index = None;
            }
            Some(())
        });
    }

    // ========================================================================
    // Engine lifecycle
    // ========================================================================

    /// Probe the host, then load the engine if it is supported
    pub async fn initialize(&self) -> SessionResult<()> {
        let capability = self.inner.bridge.loader().probe();
        self.inner.commit(false, |state| {
            if let Capability::Supported { gpu_vendor } = &capability {
                state.gpu_vendor = gpu_vendor.clone();
            }
            state.capability = capability.clone();
            Some(())
        });

        if let Capability::Unsupported { reason } = capability {
            log::warn!("Engine unavailable on this host: {}", reason);
            return Err(SessionError::Engine(EngineError::Unsupported(reason)));
        }

        self.load_engine().await
    }

    /// Load the engine for the current model.
    ///
    /// A load superseded by a newer one is discarded and resolves `Ok`.
    pub async fn load_engine(&self) -> SessionResult<()> {
        let (epoch, model) = self
            .inner
            .commit(false, |state| {
                state.load_epoch += 1;
                Some((state.load_epoch, state.params.model.clone()))
            })
            .unwrap_or_default();
        self.load_engine_at(epoch, model).await
    }

    /// Load `model` on behalf of load `epoch`. Nothing is written once a newer
    /// epoch has been issued.
    async fn load_engine_at(&self, epoch: u64, model: String) -> SessionResult<()> {
        let current = self.inner.commit(false, |state| {
            if state.load_epoch != epoch {
                return None;
            }
            state.is_ready = false;
            state.is_loading = true;
            state.engine = None;
            state.load_error = None;
            state.progress = None;
            Some(())
        });
        if current.is_none() {
            log::debug!("Skipping superseded load of model {}", model);
            return Ok(());
        }

        let progress_inner = self.inner.clone();
        let on_progress = move |progress: Progress| {
            progress_inner.commit(false, |state| {
                if state.load_epoch != epoch {
                    return None;
                }
                state.progress = Some(progress);
                Some(())
            });
        };

        log::info!("Loading engine for model {}", model);
        let load = self.inner.bridge.load(&model, on_progress);
        let result = match self.inner.timeouts.load {
            Some(limit) => tokio::time::timeout(limit, load)
                .await
                .unwrap_or(Err(EngineError::Timeout(limit))),
            None => load.await,
        };

        match result {
            Ok(handle) => {
                let applied = self.inner.commit(false, |state| {
                    if state.load_epoch != epoch {
                        return None;
                    }
                    state.gpu_vendor = handle
                        .gpu_vendor()
                        .map(str::to_string)
                        .or(state.gpu_vendor.take());
                    state.engine = Some(handle.clone());
                    state.is_ready = true;
                    state.is_loading = false;
                    Some(())
                });
                match applied {
                    Some(()) => log::info!("Engine ready for model {}", model),
                    None => log::info!("Discarding superseded load of model {}", model),
                }
                Ok(())
            }
            Err(err) => {
                let current = self.inner.commit(false, |state| {
                    if state.load_epoch != epoch {
                        return None;
                    }
                    state.is_loading = false;
                    state.is_ready = false;
                    state.load_error = Some(err.to_string());
                    Some(())
                });
                if current.is_none() {
                    log::debug!("Superseded load of model {} ended: {}", model, err);
                    return Ok(());
                }
                if matches!(err, EngineError::Timeout(_)) {
                    self.inner.bridge.unload();
                }
                log::error!("Failed to load model {}: {}", model, err);
                Err(SessionError::Engine(err))
            }
        }
    }

    /// Switch models: immediately not ready, reload in the background
    pub fn set_model(&self, model: impl Into<String>) -> SessionResult<LoadTicket> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(SessionError::InvalidParameter(
                "model cannot be empty".to_string(),
            ));
        }

        // The epoch moves with the model so any load still in flight is stale
        let epoch = self
            .inner
            .commit(true, |state| {
                state.params.model = model.clone();
                state.load_epoch += 1;
                state.is_ready = false;
                state.is_loading = true;
                state.engine = None;
                state.gpu_vendor = None;
                state.progress = None;
                Some(state.load_epoch)
            })
            .unwrap_or_default();

        let store = self.clone();
        let handle = tokio::spawn(async move { store.load_engine_at(epoch, model).await });
        Ok(LoadTicket { handle })
    }

    /// Fetch the models the engine offers
    pub async fn refresh_models(&self) -> SessionResult<Vec<ModelInfo>> {
        let models = self
            .inner
            .bridge
            .loader()
            .list_models()
            .await
            .map_err(|e| {
                log::error!("Failed to list models: {}", e);
                SessionError::Engine(e)
            })?;

        self.inner.commit(false, |state| {
            state.model_list = models.clone();
            Some(())
        });
        Ok(models)
    }

    // ========================================================================
    // Setters
    // ========================================================================

    fn update_params(&self, f: impl FnOnce(&mut GenerationParameters)) {
        self.inner.commit(true, |state| {
            f(&mut state.params);
            Some(())
        });
    }

    fn checked(name: &str, value: f32, min: f32, max: f32) -> SessionResult<()> {
        check_range(name, value, min, max).map_err(SessionError::InvalidParameter)
    }

    pub fn set_input(&self, input: impl Into<String>) {
        let input = input.into();
        self.inner.commit(true, |state| {
            state.input = input;
            Some(())
        });
    }

    /// Takes effect at the next submit or clear
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.update_params(|params| params.system_prompt = prompt);
    }

    pub fn set_temperature(&self, value: f32) -> SessionResult<()> {
        Self::checked("temperature", value, 0.0, 2.0)?;
        self.update_params(|params| params.temperature = value);
        Ok(())
    }

    pub fn set_max_tokens(&self, value: u32) -> SessionResult<()> {
        if value == 0 {
            return Err(SessionError::InvalidParameter(
                "maxTokens must be greater than 0".to_string(),
            ));
        }
        self.update_params(|params| params.max_tokens = value);
        Ok(())
    }

    pub fn set_top_p(&self, value: f32) -> SessionResult<()> {
        Self::checked("topP", value, 0.0, 1.0)?;
        self.update_params(|params| params.top_p = value);
        Ok(())
    }

    pub fn set_frequency_penalty(&self, value: f32) -> SessionResult<()> {
        Self::checked("frequencyPenalty", value, -2.0, 2.0)?;
        self.update_params(|params| params.frequency_penalty = value);
        Ok(())
    }

    pub fn set_presence_penalty(&self, value: f32) -> SessionResult<()> {
        Self::checked("presencePenalty", value, -2.0, 2.0)?;
        self.update_params(|params| params.presence_penalty = value);
        Ok(())
    }

    /// Empty entries are dropped
    pub fn set_stop_sequences(&self, sequences: Vec<String>) {
        let sequences: Vec<String> = sequences.into_iter().filter(|s| !s.is_empty()).collect();
        self.update_params(|params| params.stop_sequences = sequences);
    }

    pub fn set_seed(&self, seed: i64) {
        self.update_params(|params| params.seed = seed);
    }

    /// 0 disables logprobs
    pub fn set_logprobs(&self, count: u32) -> SessionResult<()> {
        if count > MAX_LOGPROBS {
            return Err(SessionError::InvalidParameter(format!(
                "logprobs must be between 0 and {} (got {})",
                MAX_LOGPROBS, count
            )));
        }
        self.update_params(|params| params.logprobs = count);
        Ok(())
    }

    /// Answer a tool call of the latest assistant message
    pub fn add_tool_result(
        &self,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> SessionResult<()> {
        let call_id = call_id.into();
        let message = Message::tool_result(call_id.clone(), content);

        self.inner
            .commit(true, |state| {
                if state.is_generating || !state.transcript.has_pending_tool_call(&call_id) {
                    return None;
                }
                state.transcript.push(message);
                Some(())
            })
            .ok_or_else(|| {
                SessionError::InvalidParameter(format!("No pending tool call with id {}", call_id))
            })
    }
}
