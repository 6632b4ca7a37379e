// WebChat - local chat session core
//
// Conversation state, streamed generation against an inference engine hosted
// in a background worker, SQLite-backed session persistence, and speech
// demo controllers.

pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use models::{
    Capability, GenerationParameters, Message, MessageRole, ModelInfo, Progress, ToolCall, Usage,
};
pub use repositories::{MemorySessionStorage, SessionRepository, SessionSnapshot, SessionStorage};
pub use services::{
    ChatStore, ChatView, Engine, EngineError, EngineLoader, GenerationOutcome, GenerationTicket,
    OpenAICompatibleLoader, SessionError, SessionResult, SynthesisSession, TranscriptionSession,
};
pub use utils::config::ChatConfig;
pub use utils::database::Database;
