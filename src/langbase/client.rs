use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::sse::SseDecoder;
use super::types::{CreatePipeRequest, PipeInfo, PipeRequest, PipeResponse, StreamChunk};
use super::ReasoningClient;
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};

const RUN_PATH: &str = "/v1/pipes/run";
const PIPES_PATH: &str = "/v1/pipes";

/// HTTP client for the Langbase pipes the analysis stages run on.
#[derive(Clone)]
pub struct LangbaseClient {
    http: Client,
    base_url: String,
    bearer: String,
    settings: RequestConfig,
}

impl LangbaseClient {
    /// Build a client; `settings.timeout_ms` bounds every HTTP request.
    pub fn new(config: &LangbaseConfig, settings: RequestConfig) -> LangbaseResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer: format!("Bearer {}", config.api_key),
            settings,
        })
    }

    /// Run a pipe and return its reply.
    ///
    /// Failed attempts are retried up to `max_retries` times with
    /// exponential backoff. When every attempt fails the last error is
    /// reported as `Unavailable` together with the number of attempts.
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let attempts = self.settings.max_retries.saturating_add(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                warn!(
                    pipe = %request.name,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying pipe run"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            let outcome = match self.post(RUN_PATH, &request).await {
                Ok(response) => decode::<PipeResponse>(response, "pipe run").await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(reply) => {
                    info!(
                        pipe = %request.name,
                        attempt,
                        latency_ms = start.elapsed().as_millis(),
                        "Pipe run succeeded"
                    );
                    return Ok(reply);
                }
                Err(e) => {
                    error!(
                        pipe = %request.name,
                        attempt,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        "Pipe run failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error,
            retries: attempts,
        })
    }

    /// Run a pipe in streaming mode, forwarding text deltas to `chunks`.
    ///
    /// Returns the concatenated completion. Streaming requests are not
    /// retried: once output has been forwarded it cannot be taken back.
    /// A dropped receiver does not abort the stream.
    pub async fn stream_pipe(
        &self,
        request: PipeRequest,
        chunks: mpsc::Sender<String>,
    ) -> LangbaseResult<String> {
        let request = request.streaming();
        let start = Instant::now();

        debug!(pipe = %request.name, messages = request.messages.len(), "Streaming pipe run");

        let mut response = self.post(RUN_PATH, &request).await?;

        let mut decoder = SseDecoder::new();
        let mut completion = String::new();
        let mut done = false;

        while !done {
            let events = match response.chunk().await.map_err(|e| self.transport_error(e))? {
                Some(bytes) => decoder.push(&bytes),
                None => {
                    done = true;
                    decoder.finish().into_iter().collect()
                }
            };

            for event in events {
                if event.is_done() {
                    done = true;
                    break;
                }
                let chunk: StreamChunk = serde_json::from_str(&event.data).map_err(|e| {
                    LangbaseError::InvalidResponse {
                        message: format!("Failed to parse stream chunk: {}", e),
                    }
                })?;
                if let Some(text) = chunk.text() {
                    trace!(pipe = %request.name, bytes = text.len(), "Stream delta received");
                    completion.push_str(&text);
                    let _ = chunks.send(text).await;
                }
            }
        }

        info!(
            pipe = %request.name,
            latency_ms = start.elapsed().as_millis(),
            completion_len = completion.len(),
            "Pipe stream finished"
        );

        Ok(completion)
    }

    /// Create or update a pipe.
    pub async fn create_pipe(&self, request: CreatePipeRequest) -> LangbaseResult<PipeInfo> {
        debug!(pipe = %request.name, model = %request.model, "Provisioning pipe");

        let response = self.post(PIPES_PATH, &request).await?;
        let info: PipeInfo = decode(response, "pipe creation").await?;

        info!(pipe = %info.name, url = %info.url, "Pipe provisioned");
        Ok(info)
    }

    /// Make sure the stage pipe `pipe_name` exists with `system_prompt`.
    ///
    /// A 409 from the service means the pipe is already there.
    pub async fn ensure_pipe(
        &self,
        pipe_name: &str,
        description: &str,
        system_prompt: &str,
    ) -> LangbaseResult<()> {
        let request = CreatePipeRequest::for_stage(pipe_name, description, system_prompt);

        match self.create_pipe(request).await {
            Ok(_) => Ok(()),
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Stage pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.settings.retry_delay_ms.saturating_mul(factor))
    }

    /// Authenticated JSON POST; non-2xx answers become `Api` errors.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> LangbaseResult<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", self.bearer.as_str())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(LangbaseError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> LangbaseError {
        if e.is_timeout() {
            LangbaseError::Timeout {
                timeout_ms: self.settings.timeout_ms,
            }
        } else {
            LangbaseError::Http(e)
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> LangbaseResult<T> {
    response
        .json()
        .await
        .map_err(|e| LangbaseError::InvalidResponse {
            message: format!("Failed to parse {} response: {}", what, e),
        })
}

#[async_trait]
impl ReasoningClient for LangbaseClient {
    async fn generate(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        self.call_pipe(request).await
    }

    async fn generate_stream(
        &self,
        request: PipeRequest,
        chunks: mpsc::Sender<String>,
    ) -> LangbaseResult<String> {
        self.stream_pipe(request, chunks).await
    }
}
