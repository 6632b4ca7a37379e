// Scripted speech backends for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{SpeechRecognizer, SpeechSynthesizer, SynthesisStream};
use crate::models::speech::{
    AudioChunk, AudioClip, Device, SttModel, SynthesisEvent, Transcription, TranscriptionOptions,
    Voice, VoiceParams,
};
use crate::models::Progress;
use crate::services::engine::{EngineError, EngineResult, ProgressSink};

#[derive(Default)]
pub(crate) struct ScriptedRecognizer {
    pub fail_load: bool,
    pub loads: Mutex<Vec<(SttModel, Device)>>,
    pub transcribed: Mutex<Vec<(AudioClip, TranscriptionOptions)>>,
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn load_model(
        &self,
        model: SttModel,
        device: Device,
        progress: ProgressSink,
    ) -> EngineResult<()> {
        self.loads.lock().unwrap().push((model, device));
        progress(Progress::new(0.5, model.as_str(), 0));
        if self.fail_load {
            return Err(EngineError::LoadFailed("no weights".to_string()));
        }
        progress(Progress::new(1.0, model.as_str(), 1));
        Ok(())
    }

    async fn start_recording(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn stop_recording(&self) -> EngineResult<AudioClip> {
        Ok(AudioClip::new("audio/webm", vec![1, 2, 3]))
    }

    async fn transcribe(
        &self,
        clip: &AudioClip,
        options: &TranscriptionOptions,
    ) -> EngineResult<Transcription> {
        self.transcribed
            .lock()
            .unwrap()
            .push((clip.clone(), options.clone()));
        if clip.is_empty() {
            return Err(EngineError::ApiError("empty audio".to_string()));
        }
        Ok(Transcription {
            text: format!("{} bytes in {}", clip.bytes.len(), options.language),
            timestamps: None,
        })
    }
}

#[derive(Default)]
pub(crate) struct ScriptedSynthesizer {
    pub fail_load: bool,
    pub fail_midway: bool,
    pub syntheses: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub(crate) fn synthesis_count(&self) -> usize {
        self.syntheses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn load(&self) -> EngineResult<Vec<Voice>> {
        if self.fail_load {
            return Err(EngineError::LoadFailed("no voices".to_string()));
        }
        Ok(vec![
            Voice {
                id: "af_heart".to_string(),
                name: "Heart".to_string(),
                language: "en-us".to_string(),
            },
            Voice {
                id: "bm_george".to_string(),
                name: "George".to_string(),
                language: "en-gb".to_string(),
            },
        ])
    }

    async fn synthesize(&self, text: &str, params: &VoiceParams) -> EngineResult<SynthesisStream> {
        self.syntheses.fetch_add(1, Ordering::SeqCst);
        let sentences: Vec<&str> = text.split_inclusive('.').collect();
        let mut events: Vec<EngineResult<SynthesisEvent>> = sentences
            .iter()
            .map(|sentence| {
                Ok(SynthesisEvent::Chunk(AudioChunk {
                    text: sentence.trim().to_string(),
                    audio: AudioClip::new("audio/wav", params.voice.as_bytes().to_vec()),
                }))
            })
            .collect();
        if self.fail_midway {
            events.truncate(1);
            events.push(Err(EngineError::ApiError("synthesis aborted".to_string())));
        } else {
            let whole = params.voice.as_bytes().repeat(sentences.len());
            events.push(Ok(SynthesisEvent::Complete(AudioClip::new("audio/wav", whole))));
        }
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
