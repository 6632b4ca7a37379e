// Speech-to-Text Session
// Feature: Speech Demos (002-speech)
//
// Drives a speech recognizer:
// - Model/device selection with load progress
// - Record -> stop -> automatic transcription
// - Transcription of uploaded clips
// - Result and error state for observers

use std::sync::{Arc, Mutex};

use super::SpeechRecognizer;
use crate::models::speech::{
    AudioClip, Device, SpeechTask, SttModel, Transcription, TranscriptionOptions,
};
use crate::models::Progress;
use crate::services::engine::{EngineError, EngineResult, ProgressSink};
use crate::utils::lock_unpoisoned;

/// Observable state of a transcription session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranscriptionView {
    pub model: SttModel,
    pub device: Device,
    pub options: TranscriptionOptions,
    /// Load progress, 0.0 - 1.0
    pub progress: f64,
    pub is_loading: bool,
    pub is_model_loaded: bool,
    pub is_recording: bool,
    pub is_transcribing: bool,
    pub audio: Option<AudioClip>,
    pub result: Option<Transcription>,
    pub error: Option<String>,
}

#[derive(Default)]
struct TranscriptionState {
    view: TranscriptionView,
    load_epoch: u64,
}

pub struct TranscriptionSession {
    recognizer: Arc<dyn SpeechRecognizer>,
    state: Arc<Mutex<TranscriptionState>>,
}

impl TranscriptionSession {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, device: Device) -> Self {
        let state = TranscriptionState {
            view: TranscriptionView {
                device,
                ..Default::default()
            },
            load_epoch: 0,
        };
        Self {
            recognizer,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn view(&self) -> TranscriptionView {
        lock_unpoisoned(&self.state).view.clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut TranscriptionView) -> R) -> R {
        f(&mut lock_unpoisoned(&self.state).view)
    }

    fn fail(&self, err: &EngineError, context: &str) {
        log::error!("{}: {}", context, err);
        self.update(|view| view.error = Some(err.to_string()));
    }

    // ========================================================================
    // Model
    // ========================================================================

    /// Load the selected model on the selected device
    pub async fn load(&self) -> EngineResult<()> {
        let (epoch, model, device) = {
            let mut state = lock_unpoisoned(&self.state);
            state.load_epoch += 1;
            state.view.is_loading = true;
            state.view.is_model_loaded = false;
            state.view.error = None;
            state.view.progress = 0.0;
            (state.load_epoch, state.view.model, state.view.device)
        };

        let progress_state = self.state.clone();
        let sink: ProgressSink = Arc::new(move |progress: Progress| {
            let mut state = lock_unpoisoned(&progress_state);
            if state.load_epoch == epoch {
                state.view.progress = progress.fraction;
            }
        });

        log::info!("Loading speech model {} on {:?}", model.as_str(), device);
        let result = self.recognizer.load_model(model, device, sink).await;

        let mut state = lock_unpoisoned(&self.state);
        if state.load_epoch != epoch {
            return Ok(());
        }
        state.view.is_loading = false;
        match result {
            Ok(()) => {
                state.view.is_model_loaded = true;
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to load speech model {}: {}", model.as_str(), err);
                state.view.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Select a model and reload
    pub async fn select_model(&self, model: SttModel) -> EngineResult<()> {
        self.update(|view| view.model = model);
        self.load().await
    }

    /// Select a device and reload
    pub async fn select_device(&self, device: Device) -> EngineResult<()> {
        self.update(|view| view.device = device);
        self.load().await
    }

    pub fn set_task(&self, task: SpeechTask) {
        self.update(|view| view.options.task = task);
    }

    pub fn set_language(&self, language: impl Into<String>) {
        let language = language.into();
        self.update(|view| view.options.language = language);
    }

    pub fn set_return_timestamps(&self, enabled: bool) {
        self.update(|view| view.options.return_timestamps = enabled);
    }

    // ========================================================================
    // Recording / transcription
    // ========================================================================

    /// Start recording. Returns false when no model is loaded.
    pub async fn start_recording(&self) -> EngineResult<bool> {
        let allowed = self.update(|view| {
            if !view.is_model_loaded || view.is_recording {
                return false;
            }
            view.error = None;
            view.is_recording = true;
            true
        });
        if !allowed {
            return Ok(false);
        }

        if let Err(err) = self.recognizer.start_recording().await {
            self.fail(&err, "Failed to start recording");
            self.update(|view| view.is_recording = false);
            return Err(err);
        }
        Ok(true)
    }

    /// Stop recording and transcribe what was captured.
    /// Returns `None` when nothing was recording.
    pub async fn stop_recording(&self) -> EngineResult<Option<Transcription>> {
        let was_recording = self.update(|view| std::mem::replace(&mut view.is_recording, false));
        if !was_recording {
            return Ok(None);
        }

        let clip = match self.recognizer.stop_recording().await {
            Ok(clip) => clip,
            Err(err) => {
                self.fail(&err, "Failed to stop recording");
                return Err(err);
            }
        };
        self.update(|view| view.audio = Some(clip.clone()));

        self.transcribe(&clip).await
    }

    /// Transcribe an uploaded clip
    pub async fn transcribe_file(&self, clip: AudioClip) -> EngineResult<Option<Transcription>> {
        self.update(|view| view.audio = Some(clip.clone()));
        self.transcribe(&clip).await
    }

    /// Transcribe `clip` with the current options.
    /// Returns `None` when no model is loaded.
    pub async fn transcribe(&self, clip: &AudioClip) -> EngineResult<Option<Transcription>> {
        let options = self.update(|view| {
            if !view.is_model_loaded {
                return None;
            }
            view.is_transcribing = true;
            view.error = None;
            Some(view.options.clone())
        });
        let Some(options) = options else {
            return Ok(None);
        };

        let result = self.recognizer.transcribe(clip, &options).await;
        self.update(|view| view.is_transcribing = false);

        match result {
            Ok(transcription) => {
                self.update(|view| view.result = Some(transcription.clone()));
                Ok(Some(transcription))
            }
            Err(err) => {
                self.fail(&err, "Failed to transcribe audio");
                Err(err)
            }
        }
    }

    /// Drop the last result and audio
    pub fn clear_results(&self) {
        self.update(|view| {
            view.result = None;
            view.audio = None;
        });
    }
}
