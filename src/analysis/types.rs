//! Data model for sequential analysis sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AnalysisError, AnalysisResult};

/// Free-form, type-specific properties of an entity or relationship.
pub type Properties = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Documents and extraction results
// ============================================================================

/// The text subject of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable document identifier.
    pub id: String,
    /// Where the document came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Full text content.
    pub content: String,
}

impl Document {
    /// Create a document from an id and its text.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            title: String::new(),
            content: content.into(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the source URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A mention of an entity in the document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    /// Exact mentioned text.
    pub text: String,
    /// Surrounding sentence.
    #[serde(default)]
    pub context: String,
}

/// An extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identity used for deduplication.
    pub id: String,
    /// Entity type (person, organization, ...).
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Type-specific properties.
    #[serde(default)]
    pub properties: Properties,
    /// Confidence score (0.0-1.0).
    #[serde(default)]
    pub confidence: f64,
    /// Mentions in the source text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<EntityMention>,
    /// Document this entity was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// When the entity was extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Create an entity with no properties.
    pub fn new(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            name: name.into(),
            properties: Properties::new(),
            confidence,
            mentions: Vec::new(),
            document_id: None,
            extracted_at: None,
        }
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// An extracted relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Stable identity used for deduplication.
    pub id: String,
    /// Relationship type (payment, employment, ...).
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Source entity id.
    pub from_id: String,
    /// Target entity id.
    pub to_id: String,
    /// Type-specific properties.
    #[serde(default)]
    pub properties: Properties,
    /// Confidence score (0.0-1.0).
    #[serde(default)]
    pub confidence: f64,
    /// Quote or context supporting the relationship.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    /// Document this relationship was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// When the relationship was extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

impl Relationship {
    /// Create a relationship with no properties.
    pub fn new(
        id: impl Into<String>,
        relationship_type: impl Into<String>,
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            relationship_type: relationship_type.into(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            properties: Properties::new(),
            confidence,
            context: String::new(),
            document_id: None,
            extracted_at: None,
        }
    }
}

/// An entity/relationship set with an overall confidence.
///
/// Used both for the partial result of one stage and for the combined
/// result of a whole session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Extracted entities.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Extracted relationships.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Overall confidence (0.0-1.0).
    #[serde(default)]
    pub confidence: f64,
}

impl ExtractionResult {
    /// Create a result from its parts.
    pub fn new(entities: Vec<Entity>, relationships: Vec<Relationship>, confidence: f64) -> Self {
        Self {
            entities,
            relationships,
            confidence,
        }
    }

    /// Record which document the items came from and when, keeping any
    /// provenance already present.
    pub fn stamp_provenance(&mut self, document_id: &str, at: DateTime<Utc>) {
        for entity in &mut self.entities {
            entity.document_id.get_or_insert_with(|| document_id.to_string());
            entity.extracted_at.get_or_insert(at);
        }
        for relationship in &mut self.relationships {
            relationship
                .document_id
                .get_or_insert_with(|| document_id.to_string());
            relationship.extracted_at.get_or_insert(at);
        }
    }
}

// ============================================================================
// Evidence and hypotheses
// ============================================================================

/// A claim with the evidence supporting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChain {
    /// Unique chain ID.
    pub id: String,
    /// The claim being supported.
    pub claim: String,
    /// Supporting statements.
    pub evidence: Vec<String>,
    /// Where the evidence came from.
    pub sources: Vec<String>,
    /// Confidence score (0.0-1.0).
    pub confidence: f64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl EvidenceChain {
    /// Create a chain for a claim.
    pub fn new(claim: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            claim: claim.into(),
            evidence: Vec::new(),
            sources: Vec::new(),
            confidence,
            created_at: Utc::now(),
        }
    }

    /// Set the supporting evidence.
    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Set where the evidence came from.
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

/// A candidate explanation for the findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Unique hypothesis ID.
    pub id: String,
    /// The proposed explanation.
    pub description: String,
    /// Confidence score (0.0-1.0).
    pub confidence: f64,
    /// Evidence in favour.
    pub supporting: Vec<String>,
    /// Evidence against.
    pub conflicting: Vec<String>,
    /// Questions that would confirm or refute it.
    pub questions: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Hypothesis {
    /// Create a hypothesis.
    pub fn new(description: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            confidence,
            supporting: Vec::new(),
            conflicting: Vec::new(),
            questions: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Evidence and hypotheses contributed by one stage run.
#[derive(Debug, Clone, Default)]
pub struct StageFindings {
    /// Evidence chains to append to the session.
    pub evidence: Vec<EvidenceChain>,
    /// Hypotheses to append to the session.
    pub hypotheses: Vec<Hypothesis>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Largest accepted analysis depth.
pub const MAX_DEPTH: u32 = 10;

/// Per-session tuning. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Ceiling on the number of stages actually executed (1-10).
    pub depth: u32,
    /// Ceiling on the number of stages scheduled.
    pub max_stages: usize,
    /// A stage reporting confidence below this stops the run.
    pub confidence_threshold: f64,
    /// Deadline for each stage invocation, in milliseconds.
    pub timeout_per_stage_ms: u64,
    /// Consumed by the cross-reference stage.
    pub enable_cross_reference: bool,
    /// Consumed by the hypothesis stage.
    pub enable_hypotheses: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            depth: 3,
            max_stages: 5,
            confidence_threshold: 0.6,
            timeout_per_stage_ms: 30_000,
            enable_cross_reference: true,
            enable_hypotheses: true,
        }
    }
}

impl AnalysisConfig {
    /// Set the depth, clamped to 1..=10.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth.clamp(1, MAX_DEPTH);
        self
    }

    /// Set the scheduled stage ceiling.
    pub fn with_max_stages(mut self, max_stages: usize) -> Self {
        self.max_stages = max_stages;
        self
    }

    /// Set the confidence threshold, clamped to 0.0..=1.0.
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the per-stage deadline in milliseconds.
    pub fn with_timeout_per_stage_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_per_stage_ms = timeout_ms;
        self
    }

    /// Enable or disable cross-referencing.
    pub fn with_cross_reference(mut self, enabled: bool) -> Self {
        self.enable_cross_reference = enabled;
        self
    }

    /// Enable or disable hypothesis generation.
    pub fn with_hypotheses(mut self, enabled: bool) -> Self {
        self.enable_hypotheses = enabled;
        self
    }

    /// Per-stage deadline as a duration.
    pub fn timeout_per_stage(&self) -> Duration {
        Duration::from_millis(self.timeout_per_stage_ms)
    }
}

// ============================================================================
// Stages and sessions
// ============================================================================

/// Lifecycle of a scheduled stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Scheduled, not started.
    #[default]
    Pending,
    /// Processor invocation in flight.
    Running,
    /// Processor returned successfully.
    Completed,
    /// Processor failed, timed out or was cancelled.
    Failed,
}

impl StageStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    /// Whether the stage has resolved.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (StageStatus::Pending, StageStatus::Running)
                | (StageStatus::Running, StageStatus::Completed)
                | (StageStatus::Running, StageStatus::Failed)
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(StageStatus::Pending),
            "running" => Ok(StageStatus::Running),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            _ => Err(format!("Unknown stage status: {}", s)),
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Execution loop active.
    #[default]
    Running,
    /// Ran to a normal stop; final results are set.
    Completed,
    /// A stage or the aggregation failed.
    Failed,
    /// Stopped by a termination request or shutdown.
    Terminated,
}

impl SessionStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Terminated => "terminated",
        }
    }

    /// Whether the session has reached an end state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "terminated" => Ok(SessionStatus::Terminated),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// One scheduled unit of work within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStage {
    /// `{session_id}-stage-{n}`.
    pub id: String,
    /// Processor name at schedule time.
    pub name: String,
    /// Processor description at schedule time.
    pub description: String,
    /// 1-based position in the pipeline.
    pub stage: usize,
    /// Current status.
    pub status: StageStatus,
    /// When the stage started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage resolved.
    pub completed_at: Option<DateTime<Utc>>,
    /// Partial result, set once the stage completes.
    pub results: Option<ExtractionResult>,
    /// Confidence reported by the processor.
    pub confidence: f64,
    /// Narrative findings.
    pub insights: Vec<String>,
    /// Open questions raised.
    pub questions: Vec<String>,
    /// Failure text, if the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisStage {
    /// Schedule a pending stage.
    pub fn new(
        session_id: &str,
        ordinal: usize,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{}-stage-{}", session_id, ordinal),
            name: name.into(),
            description: description.into(),
            stage: ordinal,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            results: None,
            confidence: 0.0,
            insights: Vec::new(),
            questions: Vec::new(),
            error: None,
        }
    }

    fn transition(&mut self, next: StageStatus) -> AnalysisResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AnalysisError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// pending -> running, stamping the start time.
    pub fn begin(&mut self) -> AnalysisResult<()> {
        self.transition(StageStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> completed, stamping the completion time.
    pub fn complete(&mut self) -> AnalysisResult<()> {
        self.transition(StageStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// running -> failed, recording the error text.
    pub fn fail(&mut self, error: impl Into<String>) -> AnalysisResult<()> {
        self.transition(StageStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// One end-to-end analysis run over a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    /// Unique session ID.
    pub id: String,
    /// ID of the analysed document.
    pub document_id: String,
    /// Configuration fixed at start.
    pub config: AnalysisConfig,
    /// Scheduled stages in pipeline order.
    pub stages: Vec<AnalysisStage>,
    /// Index of the stage currently (or last) executing.
    pub current_stage: usize,
    /// Overall status.
    pub status: SessionStatus,
    /// Session start timestamp.
    pub started_at: DateTime<Utc>,
    /// When the session reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Combined result, set when the session completes.
    pub final_results: Option<ExtractionResult>,
    /// Evidence chains contributed by stages.
    pub evidence: Vec<EvidenceChain>,
    /// Hypotheses contributed by stages.
    pub hypotheses: Vec<Hypothesis>,
    /// Why the session failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisSession {
    /// Create a running session with no stages scheduled.
    pub fn new(document_id: impl Into<String>, config: AnalysisConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            config,
            stages: Vec::new(),
            current_stage: 0,
            status: SessionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            final_results: None,
            evidence: Vec::new(),
            hypotheses: Vec::new(),
            error: None,
        }
    }

    /// Number of stages that completed successfully.
    pub fn stages_completed(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .count()
    }

    /// Move to a terminal status and stamp the completion time.
    ///
    /// Only a running session can finish; later calls are ignored so the
    /// first terminal status wins. Returns whether the status changed.
    pub fn finish(&mut self, status: SessionStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }
}
