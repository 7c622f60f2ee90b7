use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model every stage pipe is provisioned with.
pub const STAGE_PIPE_MODEL: &str = "openai:gpt-4o-mini";

/// Sampling temperature for stage pipes; extraction wants near-deterministic output.
pub const STAGE_PIPE_TEMPERATURE: f64 = 0.2;

/// Completion budget for stage pipes.
pub const STAGE_PIPE_MAX_TOKENS: u32 = 4000;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// One conversation turn sent to a pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    /// Stage instructions.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Stage input: the document or the prior findings.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/pipes/run`.
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    pub name: String,
    pub messages: Vec<Message>,
    /// When set the service answers with Server-Sent Events.
    pub stream: bool,
    /// Template variables; stages use them to tag calls with session and document ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
}

impl PipeRequest {
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
            variables: None,
        }
    }

    /// Switch the request to a streamed run.
    pub fn streaming(self) -> Self {
        Self {
            stream: true,
            ..self
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Reply to a non-streamed pipe run.
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    #[serde(default)]
    pub success: bool,
    pub completion: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: Option<String>,
    /// Model details echoed by the service; absent for scripted replies.
    #[serde(default)]
    pub raw: Option<ModelDetails>,
}

impl PipeResponse {
    /// A successful reply carrying only completion text.
    pub fn completion(text: impl Into<String>) -> Self {
        Self {
            success: true,
            completion: text.into(),
            thread_id: None,
            raw: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelDetails {
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// One `data:` payload of a streamed pipe run
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

/// Choice inside a streamed chunk
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
}

/// Incremental content of a streamed choice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    pub content: Option<String>,
}

impl StreamChunk {
    /// Concatenated text carried by this chunk, if any.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Body of `POST /v1/pipes`, provisioning one analysis stage.
///
/// Stage pipes always upsert and answer in JSON mode; the stage's system
/// prompt is stored on the pipe.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePipeRequest {
    pub name: String,
    pub description: String,
    pub model: String,
    pub upsert: bool,
    pub json: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
}

impl CreatePipeRequest {
    /// Request for a stage pipe named `name` carrying `system_prompt`.
    pub fn for_stage(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model: STAGE_PIPE_MODEL.to_string(),
            upsert: true,
            json: true,
            temperature: STAGE_PIPE_TEMPERATURE,
            max_tokens: STAGE_PIPE_MAX_TOKENS,
            messages: vec![Message::system(system_prompt)],
        }
    }
}

/// The provisioned pipe as reported back by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct PipeInfo {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: String,
}
