// Engine Service Module
// Feature: Browser Chat (001-chat-session)
//
// The inference engine is an external collaborator. This module defines the
// seams it is consumed through and the worker bridge that hosts it off the
// caller's task.

pub mod error;
pub mod openai_compatible;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

pub use error::{EngineError, EngineErrorCode, EngineResult};
pub use openai_compatible::{OpenAICompatibleEngine, OpenAICompatibleLoader};
pub use worker::{EngineHandle, WorkerBridge};

use crate::models::{Capability, CompletionChunk, CompletionRequest, ModelInfo, Progress};

/// Stream of chunks for one generation, in engine order
pub type DeltaStream = Pin<Box<dyn Stream<Item = EngineResult<CompletionChunk>> + Send>>;

/// Callback receiving model-load progress
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// A loaded engine able to stream chat completions
#[async_trait]
pub trait Engine: Send + Sync {
    /// Start a streamed chat completion
    async fn stream_chat(&self, request: CompletionRequest) -> EngineResult<DeltaStream>;

    /// GPU vendor the engine runs on, when known
    fn gpu_vendor(&self) -> Option<String> {
        None
    }
}

/// Creates engines for a model id
/// All engine backends (in-process runtimes, local OpenAI-compatible servers) implement this trait
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check whether this host can run the engine at all
    fn probe(&self) -> Capability;

    /// Load `model`, reporting progress zero or more times before resolving
    async fn load_model(&self, model: &str, progress: ProgressSink) -> EngineResult<Arc<dyn Engine>>;

    /// Models available to this backend
    async fn list_models(&self) -> EngineResult<Vec<ModelInfo>>;
}

/// Shared engine loader type
pub type SharedEngineLoader = Arc<dyn EngineLoader>;
