use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    clamp_confidence, generate_json, stage_request, to_prompt_json, StageInput, StageProcessor,
    StageScope,
};
use crate::analysis::types::{AnalysisStage, Entity, ExtractionResult, Relationship, StageFindings};
use crate::error::{StageError, StageResult};
use crate::langbase::ReasoningClient;
use crate::prompts::DEEP_ANALYSIS_PROMPT;

#[derive(Debug, Deserialize)]
struct DeepAnalysisResponse {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    relationships: Vec<Relationship>,
    #[serde(default)]
    insights: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

/// Stage 2: roles, motivations and influence behind the surface findings.
pub struct DeepAnalysis {
    client: Arc<dyn ReasoningClient>,
    pipe_name: String,
}

impl DeepAnalysis {
    /// Create a deep analysis stage calling `pipe_name`.
    pub fn new(client: Arc<dyn ReasoningClient>, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl StageProcessor for DeepAnalysis {
    fn name(&self) -> &str {
        "Deep Analysis"
    }

    fn description(&self) -> &str {
        "Analyze roles, motivations, influence and behavioural patterns"
    }

    async fn process(
        &self,
        scope: &StageScope,
        input: StageInput<'_>,
        stage: &mut AnalysisStage,
        _findings: &mut StageFindings,
    ) -> StageResult<()> {
        let latest = input.previous.last().ok_or_else(|| StageError::MissingInput {
            message: "deep analysis needs a prior extraction result".to_string(),
        })?;

        debug!(
            session_id = %input.session_id,
            prior_entities = latest.entities.len(),
            "Running deep analysis"
        );

        let user_content = format!(
            "Previous extraction:\n{}\n\nDocument:\n{}",
            to_prompt_json(latest, "deep analysis prior result"),
            input.document.content
        );
        let request = stage_request(&self.pipe_name, DEEP_ANALYSIS_PROMPT, user_content, &input);
        let response: DeepAnalysisResponse =
            generate_json(self.client.as_ref(), scope, request, "deep analysis").await?;

        let confidence = clamp_confidence(response.confidence);
        let mut result =
            ExtractionResult::new(response.entities, response.relationships, confidence);
        result.stamp_provenance(&input.document.id, Utc::now());

        info!(
            session_id = %input.session_id,
            entities = result.entities.len(),
            insights = response.insights.len(),
            patterns = response.patterns.len(),
            confidence,
            "Deep analysis complete"
        );

        stage.insights.extend(response.insights);
        stage
            .insights
            .extend(response.patterns.into_iter().map(|p| format!("Pattern: {}", p)));
        stage.confidence = confidence;
        stage.results = Some(result);
        Ok(())
    }
}
