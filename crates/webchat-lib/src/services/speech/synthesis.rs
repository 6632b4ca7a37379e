// Text-to-Speech Session
// Feature: Speech Demos (002-speech)
//
// Drives a speech synthesizer:
// - Voice list once the model is ready
// - Streamed audio chunks appended in text order, then the complete clip
// - Skips regenerating an unchanged (text, voice, speed) request
// - Play / pause and chunk playback position

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::task::JoinHandle;

use super::SpeechSynthesizer;
use crate::models::chat::check_range;
use crate::models::speech::{
    AudioChunk, AudioClip, SynthesisEvent, SynthesisStatus, Voice, VoiceParams,
};
use crate::services::chat::{SessionError, SessionResult};
use crate::services::engine::{EngineError, EngineResult};
use crate::utils::lock_unpoisoned;

const MIN_SPEED: f32 = 0.5;
const MAX_SPEED: f32 = 2.0;

/// Parameters of the last generated audio
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub params: VoiceParams,
}

/// Observable state of a synthesis session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SynthesisView {
    pub status: SynthesisStatus,
    pub voices: Vec<Voice>,
    pub text: String,
    pub params: VoiceParams,
    pub chunks: Vec<AudioChunk>,
    /// Whole utterance of the last finished generation, for download
    pub result: Option<AudioClip>,
    pub last_generation: Option<SynthesisRequest>,
    pub is_playing: bool,
    /// Index of the chunk being played
    pub current_chunk: Option<usize>,
    pub error: Option<String>,
}

impl SynthesisView {
    /// Whether the current request was already generated
    pub fn is_processed(&self) -> bool {
        self.last_generation
            .as_ref()
            .is_some_and(|last| last.text == self.text && last.params == self.params)
    }
}

pub struct SynthesisSession {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    state: Arc<Mutex<SynthesisView>>,
}

impl SynthesisSession {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, text: impl Into<String>) -> Self {
        let view = SynthesisView {
            text: text.into(),
            ..Default::default()
        };
        Self {
            synthesizer,
            state: Arc::new(Mutex::new(view)),
        }
    }

    pub fn view(&self) -> SynthesisView {
        lock_unpoisoned(&self.state).clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut SynthesisView) -> R) -> R {
        f(&mut lock_unpoisoned(&self.state))
    }

    /// Load the synthesis model and its voices
    pub async fn load(&self) -> EngineResult<()> {
        self.update(|view| {
            view.status = SynthesisStatus::Loading;
            view.error = None;
        });

        match self.synthesizer.load().await {
            Ok(voices) => {
                log::info!("Speech synthesizer ready with {} voices", voices.len());
                self.update(|view| {
                    view.status = SynthesisStatus::Ready;
                    view.voices = voices;
                });
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to load speech synthesizer: {}", err);
                self.update(|view| {
                    view.status = SynthesisStatus::Error;
                    view.error = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|view| view.text = text);
    }

    /// Select a voice offered by the loaded model
    pub fn set_voice(&self, voice: impl Into<String>) -> SessionResult<()> {
        let voice = voice.into();
        self.update(|view| {
            if !view.voices.is_empty() && !view.voices.iter().any(|v| v.id == voice) {
                return Err(SessionError::InvalidParameter(format!(
                    "Unknown voice: {}",
                    voice
                )));
            }
            view.params.voice = voice;
            Ok(())
        })
    }

    pub fn set_speed(&self, speed: f32) -> SessionResult<()> {
        check_range("speed", speed, MIN_SPEED, MAX_SPEED).map_err(SessionError::InvalidParameter)?;
        self.update(|view| view.params.speed = speed);
        Ok(())
    }

    /// Toggle playback. Starts a generation when the model is ready, nothing
    /// is playing and the request differs from the last generated one.
    pub fn play_pause(&self) -> Option<JoinHandle<EngineResult<()>>> {
        let request = self.update(|view| {
            let request = if !view.is_playing
                && view.status == SynthesisStatus::Ready
                && !view.is_processed()
            {
                let request = SynthesisRequest {
                    text: view.text.clone(),
                    params: view.params.clone(),
                };
                view.status = SynthesisStatus::Generating;
                view.chunks.clear();
                view.result = None;
                view.current_chunk = Some(0);
                view.last_generation = Some(request.clone());
                Some(request)
            } else {
                None
            };

            if view.current_chunk.is_none() {
                view.current_chunk = Some(0);
            }
            view.is_playing = !view.is_playing;
            request
        })?;

        let synthesizer = self.synthesizer.clone();
        let state = self.state.clone();
        Some(tokio::spawn(async move {
            generate(synthesizer, state, request).await
        }))
    }

    /// Move playback to the next chunk. Playback ends after the last chunk
    /// once generation is complete.
    pub fn advance(&self) {
        self.update(|view| {
            let next = view.current_chunk.map_or(0, |index| index + 1);
            if next < view.chunks.len() || view.status == SynthesisStatus::Generating {
                view.current_chunk = Some(next);
            } else {
                view.is_playing = false;
                view.current_chunk = None;
            }
        });
    }

    /// Jump to a chunk and play it
    pub fn play_chunk(&self, index: usize) -> bool {
        self.update(|view| {
            if index >= view.chunks.len() {
                return false;
            }
            view.current_chunk = Some(index);
            view.is_playing = true;
            true
        })
    }
}

async fn generate(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    state: Arc<Mutex<SynthesisView>>,
    request: SynthesisRequest,
) -> EngineResult<()> {
    let fail = |err: EngineError| {
        log::error!("Speech synthesis failed: {}", err);
        let mut view = lock_unpoisoned(&state);
        view.status = SynthesisStatus::Error;
        view.error = Some(err.to_string());
        view.is_playing = false;
        err
    };

    let mut stream = synthesizer
        .synthesize(&request.text, &request.params)
        .await
        .map_err(fail)?;

    while let Some(item) = stream.next().await {
        match item.map_err(fail)? {
            SynthesisEvent::Chunk(chunk) => lock_unpoisoned(&state).chunks.push(chunk),
            SynthesisEvent::Complete(clip) => {
                lock_unpoisoned(&state).result = Some(clip);
                break;
            }
        }
    }

    let mut view = lock_unpoisoned(&state);
    view.status = SynthesisStatus::Ready;
    log::debug!("Speech synthesis produced {} chunks", view.chunks.len());
    Ok(())
}
