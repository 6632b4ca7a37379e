// Chat session data models
// Feature: Browser Chat (001-chat-session)

use serde::{Deserialize, Serialize};

/// Default model loaded on first start
pub const DEFAULT_MODEL: &str = "SmolLM2-360M-Instruct-q0f32-MLC";

/// Default system prompt seeded into a fresh transcript
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an intelligent and knowledgeable AI assistant. \
You provide accurate, helpful, and well-reasoned responses while being direct and concise. \
You're capable of engaging in technical discussions and explaining complex topics clearly. \
When appropriate, you break down information into digestible parts. \
If you're unsure about something, you acknowledge it openly. \
You aim to be both professional and personable in your interactions.";

// ============================================================================
// Messages
// ============================================================================

/// Message author role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

/// Tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Unique call identifier
    pub id: String,
    /// Tool/function name
    pub name: String,
    /// Raw JSON arguments, as streamed by the engine
    pub arguments: String,
}

/// One entry of the transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on tool messages, matches `ToolCall::id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Create a tool result message answering `call_id`
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }

    /// Whether this assistant message requested tools
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

// ============================================================================
// Usage / Progress
// ============================================================================

/// Token usage reported by the engine for the latest generation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Model-load progress. Only the latest value is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// 0.0 - 1.0
    pub fraction: f64,
    pub label: String,
    pub elapsed_ms: u64,
}

impl Progress {
    pub fn new(fraction: f64, label: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
            label: label.into(),
            elapsed_ms,
        }
    }
}

// ============================================================================
// Generation Parameters
// ============================================================================

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_top_p() -> f32 {
    1.0
}

fn default_seed() -> i64 {
    42
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Sampling configuration captured at submit time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default = "default_seed")]
    pub seed: i64,
    /// Number of logprobs to request, 0 disables
    #[serde(default)]
    pub logprobs: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
            seed: default_seed(),
            logprobs: 0,
            system_prompt: default_system_prompt(),
            model: default_model(),
        }
    }
}

impl GenerationParameters {
    /// Check every field against its accepted range
    pub fn validate(&self) -> Result<(), String> {
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("topP", self.top_p, 0.0, 1.0)?;
        check_range("frequencyPenalty", self.frequency_penalty, -2.0, 2.0)?;
        check_range("presencePenalty", self.presence_penalty, -2.0, 2.0)?;
        if self.max_tokens == 0 {
            return Err("maxTokens must be greater than 0".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Validate a float parameter lies within `[min, max]`
pub fn check_range(name: &str, value: f32, min: f32, max: f32) -> Result<(), String> {
    if !value.is_finite() || value < min || value > max {
        return Err(format!(
            "{} must be between {} and {} (got {})",
            name, min, max, value
        ));
    }
    Ok(())
}

// ============================================================================
// Engine capability / models
// ============================================================================

/// Whether the host can run the engine at all
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Capability {
    #[default]
    Unknown,
    Supported {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gpu_vendor: Option<String>,
    },
    Unsupported {
        reason: String,
    },
}

impl Capability {
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported { .. })
    }
}

/// Model entry for the model picker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
}
