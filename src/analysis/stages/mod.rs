//! Stage processors.
//!
//! The controller drives an ordered list of [`StageProcessor`]s. Each one
//! sends its own prompt to its own Langbase pipe through the shared
//! [`ReasoningClient`] and writes what it learned into the stage record it
//! is handed.
//!
//! Pipeline order:
//! 1. [`SurfaceExtraction`] - entities and relationships from the text
//! 2. [`DeepAnalysis`] - roles, influence and patterns
//! 3. [`CrossReference`] - consistency checks and evidence chains
//! 4. [`HypothesisGeneration`] - explanations and information gaps
//! 5. [`RecursiveRefinement`] - final synthesis (streamed)

mod cross_reference;
mod deep;
mod hypothesis;
mod refinement;
mod surface;

pub use cross_reference::CrossReference;
pub use deep::DeepAnalysis;
pub use hypothesis::HypothesisGeneration;
pub use refinement::RecursiveRefinement;
pub use surface::SurfaceExtraction;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::types::{
    AnalysisConfig, AnalysisStage, Document, EvidenceChain, ExtractionResult, Hypothesis,
    StageFindings,
};
use crate::config::PipeConfig;
use crate::error::{StageError, StageResult};
use crate::langbase::{Message, PipeRequest, ReasoningClient};

/// Confidence reported by a skipped stage when nothing came before it.
pub const SKIPPED_STAGE_CONFIDENCE: f64 = 0.8;

/// Cancellable deadline scope for one stage invocation.
///
/// Cancelled when the session is terminated or the controller shuts down;
/// expires once the stage's deadline passes.
#[derive(Debug, Clone)]
pub struct StageScope {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl StageScope {
    /// Start a scope that expires `timeout` from now.
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Whether the scope was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// The deadline this scope was opened with, in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Run `fut` to completion unless the scope is cancelled or expires first.
    pub async fn run<F, T>(&self, fut: F) -> StageResult<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StageError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(StageError::Timeout {
                timeout_ms: self.timeout_ms(),
            }),
            out = fut => Ok(out),
        }
    }
}

/// Everything a stage may read.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// Owning session.
    pub session_id: &'a str,
    /// Session configuration.
    pub config: &'a AnalysisConfig,
    /// Document under analysis.
    pub document: &'a Document,
    /// Partial results of earlier completed stages, in pipeline order.
    pub previous: &'a [ExtractionResult],
    /// Evidence chains written by earlier stages.
    pub evidence: &'a [EvidenceChain],
    /// Hypotheses written by earlier stages.
    pub hypotheses: &'a [Hypothesis],
}

impl StageInput<'_> {
    /// Confidence a skipped stage reports: the last prior result's, if any.
    pub fn carried_confidence(&self) -> f64 {
        self.previous
            .last()
            .map(|r| r.confidence)
            .unwrap_or(SKIPPED_STAGE_CONFIDENCE)
    }
}

/// One analysis strategy in the pipeline.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// Display name, copied onto the stage record.
    fn name(&self) -> &str;

    /// Display description, copied onto the stage record.
    fn description(&self) -> &str;

    /// Run the stage.
    ///
    /// Implementations fill `stage.results`, `stage.confidence`,
    /// `stage.insights` and `stage.questions`, and push evidence or
    /// hypotheses into `findings`. Reasoning calls go through
    /// [`StageScope::run`] so that cancellation and the deadline interrupt
    /// them.
    async fn process(
        &self,
        scope: &StageScope,
        input: StageInput<'_>,
        stage: &mut AnalysisStage,
        findings: &mut StageFindings,
    ) -> StageResult<()>;
}

/// Assemble the five-stage pipeline over a shared reasoning client.
pub fn default_pipeline(
    client: Arc<dyn ReasoningClient>,
    pipes: &PipeConfig,
) -> Vec<Arc<dyn StageProcessor>> {
    vec![
        Arc::new(SurfaceExtraction::new(client.clone(), &pipes.surface)),
        Arc::new(DeepAnalysis::new(client.clone(), &pipes.deep_analysis)),
        Arc::new(CrossReference::new(client.clone(), &pipes.cross_reference)),
        Arc::new(HypothesisGeneration::new(client.clone(), &pipes.hypothesis)),
        Arc::new(RecursiveRefinement::new(client, &pipes.refinement)),
    ]
}

/// Build a system + user request for a stage pipe.
pub(crate) fn stage_request(
    pipe: &str,
    system_prompt: &str,
    user_content: String,
    input: &StageInput<'_>,
) -> PipeRequest {
    PipeRequest::new(
        pipe,
        vec![Message::system(system_prompt), Message::user(user_content)],
    )
    .with_variable("session_id", input.session_id)
    .with_variable("document_id", input.document.id.as_str())
}

/// Call a pipe under the stage scope and parse its JSON completion.
pub(crate) async fn generate_json<T: DeserializeOwned>(
    client: &dyn ReasoningClient,
    scope: &StageScope,
    request: PipeRequest,
    context: &str,
) -> StageResult<T> {
    let response = scope.run(client.generate(request)).await??;
    parse_completion(&response.completion, context)
}

/// Parse a JSON completion, fenced or raw.
pub(crate) fn parse_completion<T: DeserializeOwned>(
    completion: &str,
    context: &str,
) -> StageResult<T> {
    let json_str = extract_json_from_completion(completion).map_err(|e| {
        warn!(
            error = %e,
            context = %context,
            completion_preview = %completion.chars().take(200).collect::<String>(),
            "Failed to extract JSON from stage response"
        );
        StageError::InvalidResponse {
            message: format!("{} response extraction failed: {}", context, e),
        }
    })?;

    serde_json::from_str::<T>(json_str).map_err(|e| {
        warn!(
            error = %e,
            context = %context,
            completion_preview = %completion.chars().take(200).collect::<String>(),
            "Failed to parse stage response"
        );
        StageError::InvalidResponse {
            message: format!("Failed to parse {} response: {}", context, e),
        }
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Serialize stage context for a prompt, with a warning on failure.
pub(crate) fn to_prompt_json<T: serde::Serialize>(value: &T, context: &str) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        warn!(error = %e, context = %context, "Failed to serialize prompt context");
        "null".to_string()
    })
}

/// Force a model-reported confidence into 0.0..=1.0.
pub(crate) fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
