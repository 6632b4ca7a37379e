// Speech Service Module
// Feature: Speech Demos (002-speech)
//
// Speech-to-text and text-to-speech controllers over pluggable recognizer
// and synthesizer backends.

pub mod synthesis;
pub mod transcription;

#[cfg(test)]
pub(crate) mod testing;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use synthesis::{SynthesisSession, SynthesisView};
pub use transcription::{TranscriptionSession, TranscriptionView};

use crate::models::speech::{
    AudioClip, Device, SttModel, SynthesisEvent, Transcription, TranscriptionOptions, Voice,
    VoiceParams,
};
use crate::services::engine::{EngineResult, ProgressSink};

/// Synthesized audio: one chunk per sentence in text order, then the complete clip
pub type SynthesisStream = Pin<Box<dyn Stream<Item = EngineResult<SynthesisEvent>> + Send>>;

/// Speech recognition backend
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Load a recognition model on `device`
    async fn load_model(
        &self,
        model: SttModel,
        device: Device,
        progress: ProgressSink,
    ) -> EngineResult<()>;

    async fn start_recording(&self) -> EngineResult<()>;

    /// Stop recording and hand back the captured audio
    async fn stop_recording(&self) -> EngineResult<AudioClip>;

    async fn transcribe(
        &self,
        clip: &AudioClip,
        options: &TranscriptionOptions,
    ) -> EngineResult<Transcription>;
}

/// Speech synthesis backend
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Load the synthesis model, returning the voices it offers
    async fn load(&self) -> EngineResult<Vec<Voice>>;

    async fn synthesize(&self, text: &str, params: &VoiceParams) -> EngineResult<SynthesisStream>;
}
