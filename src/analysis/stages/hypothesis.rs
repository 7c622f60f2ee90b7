use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    clamp_confidence, generate_json, stage_request, to_prompt_json, StageInput, StageProcessor,
    StageScope,
};
use crate::analysis::types::{AnalysisStage, Hypothesis, StageFindings};
use crate::error::StageResult;
use crate::langbase::ReasoningClient;
use crate::prompts::HYPOTHESIS_GENERATION_PROMPT;

#[derive(Debug, Deserialize)]
struct HypothesisResponseItem {
    description: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    supporting: Vec<String>,
    #[serde(default)]
    conflicting: Vec<String>,
    #[serde(default)]
    questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MissingInformation {
    description: String,
    #[serde(default)]
    importance: f64,
}

#[derive(Debug, Deserialize)]
struct HypothesisResponse {
    #[serde(default)]
    hypotheses: Vec<HypothesisResponseItem>,
    #[serde(default)]
    missing_information: Vec<MissingInformation>,
    #[serde(default)]
    follow_up_questions: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

/// Stage 4: candidate explanations and the gaps that would settle them.
///
/// Produces no entities of its own; the stage completes with hypotheses and
/// questions only.
pub struct HypothesisGeneration {
    client: Arc<dyn ReasoningClient>,
    pipe_name: String,
}

impl HypothesisGeneration {
    /// Create a hypothesis stage calling `pipe_name`.
    pub fn new(client: Arc<dyn ReasoningClient>, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl StageProcessor for HypothesisGeneration {
    fn name(&self) -> &str {
        "Hypothesis Generation"
    }

    fn description(&self) -> &str {
        "Generate hypotheses and identify missing information"
    }

    async fn process(
        &self,
        scope: &StageScope,
        input: StageInput<'_>,
        stage: &mut AnalysisStage,
        findings: &mut StageFindings,
    ) -> StageResult<()> {
        if !input.config.enable_hypotheses {
            debug!(session_id = %input.session_id, "Skipping hypothesis generation");
            stage.confidence = input.carried_confidence();
            stage
                .insights
                .push("Hypothesis generation skipped: disabled by configuration".to_string());
            return Ok(());
        }

        let user_content = format!(
            "Analysis results:\n{}\n\nEvidence chains:\n{}",
            to_prompt_json(&input.previous, "hypothesis prior results"),
            to_prompt_json(&input.evidence, "hypothesis evidence")
        );
        let request = stage_request(
            &self.pipe_name,
            HYPOTHESIS_GENERATION_PROMPT,
            user_content,
            &input,
        );
        let response: HypothesisResponse =
            generate_json(self.client.as_ref(), scope, request, "hypothesis generation").await?;

        for item in response.hypotheses {
            let mut hypothesis = Hypothesis::new(item.description, clamp_confidence(item.confidence));
            hypothesis.supporting = item.supporting;
            hypothesis.conflicting = item.conflicting;
            hypothesis.questions = item.questions;
            findings.hypotheses.push(hypothesis);
        }

        let mut gaps = response.missing_information;
        gaps.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        stage.insights.extend(
            gaps.into_iter()
                .map(|gap| format!("Missing information: {}", gap.description)),
        );
        stage.questions.extend(response.follow_up_questions);

        let confidence = clamp_confidence(response.confidence);
        info!(
            session_id = %input.session_id,
            hypotheses = findings.hypotheses.len(),
            questions = stage.questions.len(),
            confidence,
            "Hypothesis generation complete"
        );

        stage.confidence = confidence;
        Ok(())
    }
}
