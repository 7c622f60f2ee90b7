use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    clamp_confidence, generate_json, stage_request, to_prompt_json, StageInput, StageProcessor,
    StageScope,
};
use crate::analysis::types::{
    AnalysisStage, Entity, EvidenceChain, ExtractionResult, Relationship, StageFindings,
};
use crate::error::StageResult;
use crate::langbase::ReasoningClient;
use crate::prompts::CROSS_REFERENCE_PROMPT;

/// Prior results needed before there is anything to cross-reference.
const MIN_PRIOR_RESULTS: usize = 2;

#[derive(Debug, Default, Deserialize)]
struct ValidationScores {
    #[serde(default)]
    consistency_score: f64,
    #[serde(default)]
    fact_check_score: f64,
    #[serde(default)]
    timeline_coherence: f64,
    #[serde(default)]
    logical_consistency: f64,
}

#[derive(Debug, Deserialize)]
struct Issue {
    #[serde(rename = "type", default)]
    issue_type: String,
    description: String,
    #[serde(default)]
    severity: String,
}

#[derive(Debug, Deserialize)]
struct EvidenceChainResponse {
    claim: String,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct CrossReferenceResponse {
    #[serde(default)]
    validation_results: ValidationScores,
    #[serde(default)]
    issues_found: Vec<Issue>,
    #[serde(default)]
    validated_entities: Vec<Entity>,
    #[serde(default)]
    validated_relationships: Vec<Relationship>,
    #[serde(default)]
    evidence_chains: Vec<EvidenceChainResponse>,
    #[serde(default)]
    confidence: f64,
}

/// Stage 3: check earlier passes against each other and build evidence chains.
pub struct CrossReference {
    client: Arc<dyn ReasoningClient>,
    pipe_name: String,
}

impl CrossReference {
    /// Create a cross-reference stage calling `pipe_name`.
    pub fn new(client: Arc<dyn ReasoningClient>, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }

    fn skip_reason(input: &StageInput<'_>) -> Option<&'static str> {
        if !input.config.enable_cross_reference {
            Some("disabled by configuration")
        } else if input.previous.len() < MIN_PRIOR_RESULTS {
            Some("not enough prior results")
        } else {
            None
        }
    }
}

#[async_trait]
impl StageProcessor for CrossReference {
    fn name(&self) -> &str {
        "Cross-Reference Validation"
    }

    fn description(&self) -> &str {
        "Validate findings across passes and build evidence chains"
    }

    async fn process(
        &self,
        scope: &StageScope,
        input: StageInput<'_>,
        stage: &mut AnalysisStage,
        findings: &mut StageFindings,
    ) -> StageResult<()> {
        if let Some(reason) = Self::skip_reason(&input) {
            debug!(session_id = %input.session_id, reason, "Skipping cross-reference validation");
            stage.confidence = input.carried_confidence();
            stage
                .insights
                .push(format!("Cross-reference validation skipped: {}", reason));
            return Ok(());
        }

        let user_content = format!(
            "Results from previous passes:\n{}\n\nDocument:\n{}",
            to_prompt_json(&input.previous, "cross-reference prior results"),
            input.document.content
        );
        let request = stage_request(&self.pipe_name, CROSS_REFERENCE_PROMPT, user_content, &input);
        let response: CrossReferenceResponse =
            generate_json(self.client.as_ref(), scope, request, "cross-reference").await?;

        let scores = &response.validation_results;
        stage.insights.push(format!(
            "Validation scores: consistency {:.2}, fact check {:.2}, timeline {:.2}, logic {:.2}",
            scores.consistency_score,
            scores.fact_check_score,
            scores.timeline_coherence,
            scores.logical_consistency
        ));
        stage.questions.extend(response.issues_found.iter().map(|issue| {
            format!(
                "[{}] {}: {}",
                if issue.severity.is_empty() { "unknown" } else { &issue.severity },
                issue.issue_type,
                issue.description
            )
        }));

        findings
            .evidence
            .extend(response.evidence_chains.into_iter().map(|chain| {
                EvidenceChain::new(chain.claim, clamp_confidence(chain.confidence))
                    .with_evidence(chain.evidence)
                    .with_sources(chain.sources)
            }));

        let confidence = clamp_confidence(response.confidence);
        let mut result = ExtractionResult::new(
            response.validated_entities,
            response.validated_relationships,
            confidence,
        );
        result.stamp_provenance(&input.document.id, Utc::now());

        info!(
            session_id = %input.session_id,
            issues = response.issues_found.len(),
            evidence_chains = findings.evidence.len(),
            confidence,
            "Cross-reference validation complete"
        );

        stage.confidence = confidence;
        stage.results = Some(result);
        Ok(())
    }
}
