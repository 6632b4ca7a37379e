// Engine wire models
// Feature: Browser Chat (001-chat-session)
//
// Request/response shapes exchanged with the inference engine. They follow the
// OpenAI chat-completions streaming format, which both in-process engines and
// local OpenAI-compatible servers speak.

use serde::{Deserialize, Serialize};

use super::chat::{GenerationParameters, Message, MessageRole, ToolCall, Usage};

/// Outgoing message as the engine sees it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<EngineToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Message> for EngineMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .as_ref()
                .map(|calls| calls.iter().map(EngineToolCall::from).collect()),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: EngineFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineFunctionCall {
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for EngineToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            tool_type: "function".to_string(),
            function: EngineFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// Streaming chat completion request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<EngineMessage>,
    pub stream: bool,
    pub stream_options: StreamOptions,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
}

impl CompletionRequest {
    /// Build a streaming request. Empty stop sequences and a zero logprobs count
    /// are left out of the request entirely.
    pub fn streaming(messages: &[Message], params: &GenerationParameters) -> Self {
        let stop = if params.stop_sequences.is_empty() {
            None
        } else {
            Some(params.stop_sequences.clone())
        };
        let (logprobs, top_logprobs) = if params.logprobs > 0 {
            (Some(true), Some(params.logprobs))
        } else {
            (None, None)
        };

        Self {
            model: params.model.clone(),
            messages: messages.iter().map(EngineMessage::from).collect(),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stop,
            seed: params.seed,
            logprobs,
            top_logprobs,
        }
    }
}

// ============================================================================
// Streamed chunks
// ============================================================================

/// Why the engine stopped generating
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    #[serde(other)]
    Unknown,
}

/// Partial function call inside a tool call delta
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Incremental tool call; fragments sharing an `index` belong to the same call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Most tool calls one assistant message may carry
pub const MAX_TOOL_CALLS: usize = 128;

/// One streamed unit of a generation (partial text and/or usage)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl CompletionChunk {
    /// Chunk carrying a text fragment
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: Some(content.into()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Chunk carrying only a usage report
    pub fn usage(usage: Usage) -> Self {
        Self {
            choices: Vec::new(),
            usage: Some(usage),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Text of the first choice, if any
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }

    /// Tool call fragments of the first choice, if any
    pub fn tool_calls(&self) -> Option<&[ToolCallDelta]> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.tool_calls.as_deref())
    }
    /// Reject chunks whose tool call indices exceed [`MAX_TOOL_CALLS`]
    pub fn validate(&self) -> Result<(), String> {
        let deltas = self.choices.iter().flat_map(|choice| {
            choice.delta.tool_calls.iter().flatten()
        });
        for delta in deltas {
            if delta.index >= MAX_TOOL_CALLS {
                return Err(format!(
                    "tool call index {} exceeds the limit of {}",
                    delta.index, MAX_TOOL_CALLS
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_request_omits_disabled_options() {
        let params = GenerationParameters::default();
        let request = CompletionRequest::streaming(&[Message::user("hi")], &params);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert!(json.get("stop").is_none());
        assert!(json.get("logprobs").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_streaming_request_includes_stop_and_logprobs() {
        let params = GenerationParameters {
            stop_sequences: vec!["###".to_string()],
            logprobs: 3,
            ..Default::default()
        };
        let request = CompletionRequest::streaming(&[], &params);
        assert_eq!(request.stop, Some(vec!["###".to_string()]));
        assert_eq!(request.logprobs, Some(true));
        assert_eq!(request.top_logprobs, Some(3));
    }

    #[test]
    fn test_validate_rejects_huge_tool_call_index() {
        let chunk: CompletionChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":5000000,"function":{"name":"x"}}]}}]}"#,
        )
        .unwrap();
        let err = chunk.validate().unwrap_err();
        assert!(err.contains("5000000"));

        assert!(CompletionChunk::text("plain").validate().is_ok());
    }

    #[test]
    fn test_parse_openai_chunk() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}]
        }"#;
        let chunk: CompletionChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.content(), Some("Hel"));
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_parse_usage_only_chunk() {
        let raw = r#"{"choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}}"#;
        let chunk: CompletionChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.content(), None);
        assert_eq!(chunk.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn test_unknown_finish_reason_is_tolerated() {
        let raw = r#"{"choices": [{"delta": {}, "finish_reason": "abort"}]}"#;
        let chunk: CompletionChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::Unknown));
    }
}
