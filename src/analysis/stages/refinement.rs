use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::{
    clamp_confidence, parse_completion, stage_request, to_prompt_json, StageInput,
    StageProcessor, StageScope,
};
use crate::analysis::types::{AnalysisStage, Entity, ExtractionResult, Relationship, StageFindings};
use crate::error::StageResult;
use crate::langbase::ReasoningClient;
use crate::prompts::RECURSIVE_REFINEMENT_PROMPT;

/// Buffered stream deltas before the producer waits on the consumer.
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
struct RefinementResponse {
    #[serde(default)]
    final_entities: Vec<Entity>,
    #[serde(default)]
    final_relationships: Vec<Relationship>,
    #[serde(default)]
    key_insights: Vec<String>,
    #[serde(default)]
    next_steps: Vec<String>,
    #[serde(default)]
    open_questions: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

/// Stage 5: final synthesis over everything the session has gathered.
///
/// The synthesis is the longest completion in the pipeline, so it is
/// streamed and the deltas are traced as they arrive.
pub struct RecursiveRefinement {
    client: Arc<dyn ReasoningClient>,
    pipe_name: String,
}

impl RecursiveRefinement {
    /// Create a refinement stage calling `pipe_name`.
    pub fn new(client: Arc<dyn ReasoningClient>, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl StageProcessor for RecursiveRefinement {
    fn name(&self) -> &str {
        "Recursive Refinement"
    }

    fn description(&self) -> &str {
        "Synthesize all passes into final conclusions and next steps"
    }

    async fn process(
        &self,
        scope: &StageScope,
        input: StageInput<'_>,
        stage: &mut AnalysisStage,
        _findings: &mut StageFindings,
    ) -> StageResult<()> {
        debug!(
            session_id = %input.session_id,
            prior_results = input.previous.len(),
            evidence = input.evidence.len(),
            hypotheses = input.hypotheses.len(),
            "Running recursive refinement"
        );

        let user_content = format!(
            "Analysis results:\n{}\n\nEvidence chains:\n{}\n\nHypotheses:\n{}",
            to_prompt_json(&input.previous, "refinement prior results"),
            to_prompt_json(&input.evidence, "refinement evidence"),
            to_prompt_json(&input.hypotheses, "refinement hypotheses")
        );
        let request = stage_request(
            &self.pipe_name,
            RECURSIVE_REFINEMENT_PROMPT,
            user_content,
            &input,
        );

        let (tx, mut rx) = mpsc::channel::<String>(STREAM_BUFFER);
        let session_id = input.session_id;
        let drain = async move {
            let mut received = 0usize;
            while let Some(piece) = rx.recv().await {
                received += piece.len();
                trace!(session_id = %session_id, bytes = received, "Refinement delta");
            }
            received
        };

        let (completion, streamed_bytes) = scope
            .run(async { tokio::join!(self.client.generate_stream(request, tx), drain) })
            .await?;
        let completion = completion?;

        let response: RefinementResponse = parse_completion(&completion, "recursive refinement")?;

        let confidence = clamp_confidence(response.confidence);
        let mut result = ExtractionResult::new(
            response.final_entities,
            response.final_relationships,
            confidence,
        );
        result.stamp_provenance(&input.document.id, Utc::now());

        info!(
            session_id = %input.session_id,
            entities = result.entities.len(),
            relationships = result.relationships.len(),
            streamed_bytes,
            confidence,
            "Recursive refinement complete"
        );

        stage.insights.extend(response.key_insights);
        stage
            .insights
            .extend(response.next_steps.into_iter().map(|s| format!("Next step: {}", s)));
        stage.questions.extend(response.open_questions);
        stage.confidence = confidence;
        stage.results = Some(result);
        Ok(())
    }
}
