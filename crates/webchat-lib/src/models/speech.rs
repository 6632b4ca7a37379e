// Speech demo data models
// Feature: Speech Demos (002-speech)

use serde::{Deserialize, Serialize};

// ============================================================================
// Speech-to-text
// ============================================================================

/// Speech recognition models offered by the demo
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SttModel {
    #[default]
    #[serde(rename = "whisper-tiny-en")]
    WhisperTinyEn,
    #[serde(rename = "whisper-base-all")]
    WhisperBaseAll,
    #[serde(rename = "whisper-small-all")]
    WhisperSmallAll,
}

impl SttModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SttModel::WhisperTinyEn => "whisper-tiny-en",
            SttModel::WhisperBaseAll => "whisper-base-all",
            SttModel::WhisperSmallAll => "whisper-small-all",
        }
    }
}

/// Where the recognizer runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Webgpu,
    Cpu,
}

/// Transcribe in the source language or translate to English
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeechTask {
    #[default]
    Transcribe,
    Translate,
}

/// Recorded or uploaded audio, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioClip {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AudioClip {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn default_chunk_length_s() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionOptions {
    pub language: String,
    pub task: SpeechTask,
    pub return_timestamps: bool,
    #[serde(default = "default_chunk_length_s")]
    pub chunk_length_s: u32,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            task: SpeechTask::Transcribe,
            return_timestamps: false,
            chunk_length_s: default_chunk_length_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimestampSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Transcription {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<TimestampSegment>>,
}

// ============================================================================
// Text-to-speech
// ============================================================================

/// Voice offered by the synthesizer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Voice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub language: String,
}

/// Default voice id
pub const DEFAULT_VOICE: &str = "af_heart";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParams {
    pub voice: String,
    pub speed: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            speed: 1.0,
        }
    }
}

/// One synthesized sentence of audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub text: String,
    pub audio: AudioClip,
}

/// Item of a synthesis stream
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// Audio for the next sentence, in text order
    Chunk(AudioChunk),
    /// The whole utterance as one clip; ends the stream
    Complete(AudioClip),
}

/// Text-to-speech controller status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStatus {
    #[default]
    Loading,
    Ready,
    Generating,
    Error,
}
