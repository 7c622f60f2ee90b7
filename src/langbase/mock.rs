use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use super::types::{PipeRequest, PipeResponse};
use super::ReasoningClient;
use crate::error::{LangbaseError, LangbaseResult};

/// Size of the pieces a scripted reply is split into when streamed.
const STREAM_PIECE_CHARS: usize = 16;

/// One scripted reaction to a pipe call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this completion.
    Completion(String),
    /// Fail with an API error carrying this message.
    Failure(String),
    /// Wait, then return this completion.
    Delayed(Duration, String),
    /// Never answer.
    Hang,
}

/// A recorded pipe call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Pipe the call was addressed to.
    pub pipe: String,
    /// Whether the streaming entry point was used.
    pub streamed: bool,
    /// The full request.
    pub request: PipeRequest,
}

/// In-process [`ReasoningClient`] that replays scripted replies.
///
/// Replies are queued per pipe name and consumed in order. A call to a
/// pipe with an empty queue fails with [`LangbaseError::Unavailable`].
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    /// Create a client with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `pipe`.
    pub fn push(&self, pipe: impl Into<String>, reply: ScriptedReply) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pipe.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a completion for `pipe`.
    pub fn reply(&self, pipe: impl Into<String>, completion: impl Into<String>) -> &Self {
        self.push(pipe, ScriptedReply::Completion(completion.into()))
    }

    /// Queue a failure for `pipe`.
    pub fn fail(&self, pipe: impl Into<String>, message: impl Into<String>) -> &Self {
        self.push(pipe, ScriptedReply::Failure(message.into()))
    }

    /// Calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replies still queued across all pipes.
    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }

    fn next_reply(&self, request: &PipeRequest, streamed: bool) -> LangbaseResult<ScriptedReply> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                pipe: request.name.clone(),
                streamed,
                request: request.clone(),
            });

        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&request.name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| LangbaseError::Unavailable {
                message: format!("no scripted reply for pipe '{}'", request.name),
                retries: 0,
            })
    }

    async fn resolve(reply: ScriptedReply) -> LangbaseResult<String> {
        match reply {
            ScriptedReply::Completion(text) => Ok(text),
            ScriptedReply::Failure(message) => Err(LangbaseError::Api {
                status: 500,
                message,
            }),
            ScriptedReply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            ScriptedReply::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ReasoningClient for ScriptedClient {
    async fn generate(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let reply = self.next_reply(&request, false)?;
        let completion = Self::resolve(reply).await?;
        Ok(PipeResponse::completion(completion))
    }

    async fn generate_stream(
        &self,
        request: PipeRequest,
        chunks: mpsc::Sender<String>,
    ) -> LangbaseResult<String> {
        let reply = self.next_reply(&request, true)?;
        let completion = Self::resolve(reply).await?;

        let chars: Vec<char> = completion.chars().collect();
        for piece in chars.chunks(STREAM_PIECE_CHARS) {
            let _ = chunks.send(piece.iter().collect()).await;
        }
        Ok(completion)
    }
}
