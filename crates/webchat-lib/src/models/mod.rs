// Data models

pub mod chat;
pub mod engine;
pub mod speech;

pub use chat::{
    Capability, GenerationParameters, Message, MessageRole, ModelInfo, Progress, ToolCall, Usage,
    DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
};
pub use engine::{
    CompletionChunk, CompletionRequest, EngineMessage, FinishReason, ToolCallDelta, MAX_TOOL_CALLS,
};
