// Services module
// Chat session, inference engine and speech controllers

pub mod chat;
pub mod engine;
pub mod speech;

pub use chat::*;
pub use engine::{
    DeltaStream, Engine, EngineError, EngineErrorCode, EngineHandle, EngineLoader, EngineResult,
    OpenAICompatibleEngine, OpenAICompatibleLoader, ProgressSink, SharedEngineLoader,
    WorkerBridge,
};
pub use speech::{
    SpeechRecognizer, SpeechSynthesizer, SynthesisSession, SynthesisStream, SynthesisView,
    TranscriptionSession, TranscriptionView,
};
