// Transcript
// Feature: Browser Chat (001-chat-session)
//
// Ordered message list with exactly one leading system message. Only the
// most recently appended assistant message is ever mutated.

use uuid::Uuid;

use crate::models::{CompletionChunk, Message, MessageRole, ToolCall, MAX_TOOL_CALLS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Fresh transcript holding only the system prompt
    pub fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Rebuild from stored messages, collapsing system messages into one leading entry
    pub fn restore(messages: Vec<Message>, system_prompt: &str) -> Self {
        let mut transcript = Self::new(system_prompt);
        transcript
            .messages
            .extend(messages.into_iter().filter(|m| m.role != MessageRole::System));
        transcript
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn reset(&mut self, system_prompt: &str) {
        *self = Self::new(system_prompt);
    }

    /// Start a turn: `[system(system_prompt), ...non-system, user]`
    pub fn begin_turn(&mut self, system_prompt: &str, user: Message) {
        let previous = std::mem::take(&mut self.messages);
        *self = Self::restore(previous, system_prompt);
        self.messages.push(user);
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append an empty assistant message and return its index
    pub fn push_assistant_placeholder(&mut self) -> usize {
        self.messages.push(Message::assistant(""));
        self.messages.len() - 1
    }

    /// Apply a streamed chunk to the assistant message at `index`.
    /// Returns false when `index` is not the trailing assistant message.
    pub fn append_chunk(&mut self, index: usize, chunk: &CompletionChunk) -> bool {
        if index + 1 != self.messages.len() {
            return false;
        }
        let message = &mut self.messages[index];
        if message.role != MessageRole::Assistant {
            return false;
        }

        if let Some(content) = chunk.content() {
            message.content.push_str(content);
        }

        if let Some(deltas) = chunk.tool_calls() {
            let calls = message.tool_calls.get_or_insert_with(Vec::new);
            for delta in deltas.iter().filter(|delta| delta.index < MAX_TOOL_CALLS) {
                while calls.len() <= delta.index {
                    calls.push(ToolCall {
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                }
                let call = &mut calls[delta.index];
                if let Some(id) = &delta.id {
                    call.id = id.clone();
                }
                if let Some(function) = &delta.function {
                    if let Some(name) = &function.name {
                        call.name.push_str(name);
                    }
                    if let Some(arguments) = &function.arguments {
                        call.arguments.push_str(arguments);
                    }
                }
            }
        }

        true
    }

    /// Give every streamed tool call an id and drop an empty call list
    pub fn finalize_tool_calls(&mut self, index: usize) {
        let Some(message) = self.messages.get_mut(index) else {
            return;
        };
        if let Some(calls) = &mut message.tool_calls {
            calls.retain(|call| !call.name.is_empty());
            for call in calls.iter_mut().filter(|call| call.id.is_empty()) {
                call.id = format!("tc_{}", &Uuid::new_v4().simple().to_string()[..12]);
            }
        }
        if !message.has_tool_calls() {
            message.tool_calls = None;
        }
    }

    /// Remove the message at `index` if it is the trailing entry
    pub fn rollback(&mut self, index: usize) -> Option<Message> {
        if index > 0 && index + 1 == self.messages.len() {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Whether `call_id` names a tool call of the latest assistant message
    pub fn has_pending_tool_call(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .and_then(|m| m.tool_calls.as_ref())
            .is_some_and(|calls| calls.iter().any(|call| call.id == call_id))
    }
}
