//! Langbase reasoning-service client.
//!
//! Stage processors never talk HTTP themselves; they hold an
//! `Arc<dyn ReasoningClient>` injected when the pipeline is assembled.

mod client;
mod mock;
mod sse;
mod types;


pub use client::LangbaseClient;
pub use mock::{RecordedCall, ScriptedClient, ScriptedReply};
pub use sse::{SseDecoder, SseEvent};
pub use types::*;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LangbaseResult;

/// Chat-style text generation used by the analysis stages.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Generate a completion for a conversation.
    async fn generate(&self, request: PipeRequest) -> LangbaseResult<PipeResponse>;

    /// Generate a completion, forwarding text deltas to `chunks` as they
    /// arrive. Returns the full completion text.
    async fn generate_stream(
        &self,
        request: PipeRequest,
        chunks: mpsc::Sender<String>,
    ) -> LangbaseResult<String>;
}
