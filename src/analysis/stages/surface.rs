use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::{clamp_confidence, generate_json, stage_request, StageInput, StageProcessor, StageScope};
use crate::analysis::types::{AnalysisStage, Entity, ExtractionResult, Relationship, StageFindings};
use crate::error::StageResult;
use crate::langbase::ReasoningClient;
use crate::prompts::SURFACE_EXTRACTION_PROMPT;

#[derive(Debug, Deserialize)]
struct SurfaceResponse {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    relationships: Vec<Relationship>,
    #[serde(default)]
    confidence: f64,
}

/// Stage 1: pull entities and relationships straight out of the text.
pub struct SurfaceExtraction {
    client: Arc<dyn ReasoningClient>,
    pipe_name: String,
}

impl SurfaceExtraction {
    /// Create a surface extraction stage calling `pipe_name`.
    pub fn new(client: Arc<dyn ReasoningClient>, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }

    fn user_message(input: &StageInput<'_>) -> String {
        let document = input.document;
        let mut content = String::new();
        if !document.title.is_empty() {
            content.push_str(&format!("Title: {}\n", document.title));
        }
        if let Some(url) = &document.url {
            content.push_str(&format!("Source: {}\n", url));
        }
        content.push_str(&format!("\nContent:\n{}", document.content));
        content
    }
}

#[async_trait]
impl StageProcessor for SurfaceExtraction {
    fn name(&self) -> &str {
        "Surface Extraction"
    }

    fn description(&self) -> &str {
        "Extract entities and relationships directly stated in the document"
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
            document_id = %input.document.id,
            content_len = input.document.content.len(),
            "Running surface extraction"
        );

        let request = stage_request(
            &self.pipe_name,
            SURFACE_EXTRACTION_PROMPT,
            Self::user_message(&input),
            &input,
        );
        let response: SurfaceResponse =
            generate_json(self.client.as_ref(), scope, request, "surface extraction").await?;

        let confidence = clamp_confidence(response.confidence);
        let mut result =
            ExtractionResult::new(response.entities, response.relationships, confidence);
        result.stamp_provenance(&input.document.id, Utc::now());

        info!(
            session_id = %input.session_id,
            entities = result.entities.len(),
            relationships = result.relationships.len(),
            confidence,
            "Surface extraction complete"
        );

        stage.insights.push(format!(
            "Extracted {} entities and {} relationships",
            result.entities.len(),
            result.relationships.len()
        ));
        stage.confidence = confidence;
        stage.results = Some(result);
        Ok(())
    }
}
