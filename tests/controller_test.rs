//! Integration tests for the analysis controller
//!
//! Drives whole sessions through small hand-written stage processors, plus
//! one end-to-end run of the default pipeline over a scripted reasoning
//! client.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sequential_analysis::analysis::{
    AnalysisConfig, AnalysisController, AnalysisSession, AnalysisStage, Document, Entity,
    EvidenceChain, ExtractionResult, Hypothesis, SessionStatus, StageFindings, StageInput,
    StageProcessor, StageScope, StageStatus,
};
use sequential_analysis::config::PipeConfig;
use sequential_analysis::error::{AnalysisError, StageError, StageResult};
use sequential_analysis::langbase::ScriptedClient;

/// How a test stage behaves when invoked.
#[derive(Clone)]
enum Behavior {
    /// Succeed with this confidence and one entity per id.
    Succeed(f64, Vec<(&'static str, &'static str)>),
    /// Succeed with no partial result.
    Empty(f64),
    /// Fail with an invalid-response error.
    Fail,
    /// Wait on the scope forever; only cancellation or the deadline ends it.
    HangInScope,
    /// Sleep without looking at the scope.
    Sleep(Duration),
    /// Panic inside the processor.
    Panic,
}

struct TestStage {
    name: String,
    behavior: Behavior,
    seen_previous: Arc<Mutex<Vec<usize>>>,
}

impl TestStage {
    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            seen_previous: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn recording(name: &str, behavior: Behavior, seen: Arc<Mutex<Vec<usize>>>) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            seen_previous: seen,
        }
    }
}

#[async_trait]
impl StageProcessor for TestStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test stage"
    }

    async fn process(
        &self,
        scope: &StageScope,
        input: StageInput<'_>,
        stage: &mut AnalysisStage,
        findings: &mut StageFindings,
    ) -> StageResult<()> {
        self.seen_previous.lock().unwrap().push(input.previous.len());

        match &self.behavior {
            Behavior::Succeed(confidence, entities) => {
                let entities = entities
                    .iter()
                    .map(|(id, kind)| Entity::new(*id, *kind, *id, *confidence))
                    .collect();
                stage.confidence = *confidence;
                stage.results = Some(ExtractionResult::new(entities, Vec::new(), *confidence));
                findings
                    .evidence
                    .push(EvidenceChain::new(format!("claim from {}", self.name), *confidence));
                findings
                    .hypotheses
                    .push(Hypothesis::new(format!("hypothesis from {}", self.name), 0.5));
                Ok(())
            }
            Behavior::Empty(confidence) => {
                stage.confidence = *confidence;
                Ok(())
            }
            Behavior::Fail => Err(StageError::InvalidResponse {
                message: "model returned prose".to_string(),
            }),
            Behavior::HangInScope => scope.run(std::future::pending::<()>()).await,
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                stage.confidence = 0.9;
                Ok(())
            }
            Behavior::Panic => panic!("processor bug in {}", self.name),
        }
    }
}

fn pipeline(behaviors: Vec<Behavior>) -> Vec<Arc<dyn StageProcessor>> {
    behaviors
        .into_iter()
        .enumerate()
        .map(|(i, b)| Arc::new(TestStage::new(&format!("stage-{}", i + 1), b)) as Arc<dyn StageProcessor>)
        .collect()
}

fn succeed(confidence: f64) -> Behavior {
    Behavior::Succeed(confidence, vec![("e1", "person")])
}

fn config() -> AnalysisConfig {
    AnalysisConfig::default()
        .with_depth(10)
        .with_max_stages(5)
        .with_timeout_per_stage_ms(5_000)
}

fn document() -> Document {
    Document::new("doc-1", "Some article text").with_title("Title")
}

async fn wait_for_stage_status(
    controller: &AnalysisController,
    session_id: &str,
    index: usize,
    status: StageStatus,
) -> AnalysisSession {
    for _ in 0..200 {
        let session = controller.get_session(session_id).unwrap();
        if session.stages[index].status == status {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stage {} never reached {}", index, status);
}

#[cfg(test)]
mod start_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_start_returns_running_snapshot_with_contiguous_stages() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9); 5]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();

        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.document_id, "doc-1");
        assert_eq!(session.stages_completed(), 0);
        assert_eq!(session.stages.len(), 5);
        for (i, stage) in session.stages.iter().enumerate() {
            assert_eq!(stage.stage, i + 1);
            assert_eq!(stage.id, format!("{}-stage-{}", session.id, i + 1));
            assert_eq!(stage.name, format!("stage-{}", i + 1));
            assert_eq!(stage.description, "test stage");
            assert_eq!(stage.status, StageStatus::Pending);
        }
        assert!(session.final_results.is_none());
    }

    #[tokio::test]
    async fn test_max_stages_is_clamped_to_pipeline() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9); 3]));
        assert_eq!(controller.pipeline_len(), 3);

        let session = controller
            .start_analysis(document(), Some(config().with_max_stages(10)))
            .unwrap();
        assert_eq!(session.stages.len(), 3);

        let session = controller
            .start_analysis(document(), Some(config().with_max_stages(2)))
            .unwrap();
        assert_eq!(session.stages.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_config_uses_controller_defaults() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9); 5]))
            .with_defaults(config().with_depth(1));

        let session = controller.start_analysis(document(), None).unwrap();
        assert_eq!(session.config.depth, 1);

        let done = controller.wait_for_completion(&session.id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.stages_completed(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let controller = Arc::new(AnalysisController::with_pipeline(pipeline(vec![
            Behavior::Sleep(Duration::from_millis(5)),
            succeed(0.9),
            Behavior::Sleep(Duration::from_millis(5)),
        ])));

        let mut ids = Vec::new();
        for i in 0..10 {
            let doc = Document::new(format!("doc-{}", i), "text");
            ids.push(controller.start_analysis(doc, Some(config())).unwrap().id);
        }

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 10);

        for (i, id) in ids.iter().enumerate() {
            let session = controller.wait_for_completion(id).await.unwrap();
            assert_eq!(session.status, SessionStatus::Completed);
            assert_eq!(session.document_id, format!("doc-{}", i));
            assert_eq!(session.stages_completed(), 3);
            assert!(session.stages.iter().all(|s| s.id.starts_with(id.as_str())));
        }
    }
}

#[cfg(test)]
mod stopping_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_low_confidence_stops_after_second_stage() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![
            succeed(0.9),
            succeed(0.3),
            succeed(0.9),
            succeed(0.9),
            succeed(0.9),
        ]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.stages_completed(), 2);
        assert_eq!(done.current_stage, 1);
        assert!(done.stages[2..].iter().all(|s| s.status == StageStatus::Pending));
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());

        let combined = done.final_results.unwrap();
        assert!((combined.confidence - 0.6).abs() < 1e-9);
        assert_eq!(combined.entities.len(), 1);
        assert_eq!(combined.entities[0].confidence, 0.9);
    }

    #[tokio::test]
    async fn test_depth_halts_regardless_of_confidence() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.95); 5]));

        let session = controller
            .start_analysis(document(), Some(config().with_depth(2)))
            .unwrap();
        assert_eq!(session.stages.len(), 5);

        let done = controller.wait_for_completion(&session.id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.stages_completed(), 2);
        assert_eq!(
            done.stages.iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![
                StageStatus::Completed,
                StageStatus::Completed,
                StageStatus::Pending,
                StageStatus::Pending,
                StageStatus::Pending,
            ]
        );
    }

    #[tokio::test]
    async fn test_exhausting_stages_completes() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9); 3]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.stages_completed(), 3);
        for stage in &done.stages {
            assert!(stage.started_at.is_some());
            assert!(stage.completed_at.is_some());
            assert!(stage.started_at <= stage.completed_at);
        }
        assert_eq!(done.evidence.len(), 3);
        assert_eq!(done.hypotheses.len(), 3);
    }

    #[tokio::test]
    async fn test_stages_see_only_nonempty_prior_results() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline: Vec<Arc<dyn StageProcessor>> = vec![
            Arc::new(TestStage::recording("a", succeed(0.9), seen.clone())),
            Arc::new(TestStage::recording("b", Behavior::Empty(0.9), seen.clone())),
            Arc::new(TestStage::recording("c", succeed(0.9), seen.clone())),
            Arc::new(TestStage::recording("d", succeed(0.9), seen.clone())),
        ];
        let controller = AnalysisController::with_pipeline(pipeline);

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 1, 2]);
        let combined = done.final_results.unwrap();
        // Mean over the three partial results, not the four stages.
        assert!((combined.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_results_leaves_final_results_absent() {
        let controller =
            AnalysisController::with_pipeline(pipeline(vec![Behavior::Empty(0.9); 2]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert!(done.final_results.is_none());
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_stage_error_fails_session() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![
            succeed(0.9),
            Behavior::Fail,
            succeed(0.9),
        ]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert_eq!(done.stages[0].status, StageStatus::Completed);
        assert_eq!(done.stages[1].status, StageStatus::Failed);
        assert_eq!(done.stages[2].status, StageStatus::Pending);

        let error = done.stages[1].error.as_deref().unwrap();
        assert_eq!(error, "Invalid stage response: model returned prose");
        assert_eq!(
            done.error.as_deref(),
            Some("Stage 2 failed: Invalid stage response: model returned prose")
        );
        assert!(done.stages[1].completed_at.is_some());
        assert!(done.completed_at.is_some());
        assert!(done.final_results.is_none());
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_session() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![
            succeed(0.9),
            Behavior::Sleep(Duration::from_secs(30)),
        ]));

        let session = controller
            .start_analysis(document(), Some(config().with_timeout_per_stage_ms(50)))
            .unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert_eq!(done.stages[1].status, StageStatus::Failed);
        let error = done.stages[1].error.clone().unwrap();
        assert!(!error.is_empty());
        assert!(error.contains("50ms"), "unexpected error text: {}", error);
    }

    #[tokio::test]
    async fn test_scope_deadline_fails_session() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![Behavior::HangInScope]));

        let session = controller
            .start_analysis(document(), Some(config().with_timeout_per_stage_ms(30)))
            .unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert_eq!(
            done.stages[0].error.as_deref(),
            Some("Stage deadline exceeded after 30ms")
        );
    }

    #[tokio::test]
    async fn test_panicking_processor_fails_session() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![
            succeed(0.9),
            Behavior::Panic,
            succeed(0.9),
        ]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = tokio::time::timeout(
            Duration::from_secs(5),
            controller.wait_for_completion(&session.id),
        )
        .await
        .expect("session never finished")
        .unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.stages[0].status, StageStatus::Completed);
        assert_eq!(done.stages[1].status, StageStatus::Failed);
        assert_eq!(done.stages[2].status, StageStatus::Pending);
        assert!(done.stages[1].error.is_some());
        assert!(done.error.as_deref().unwrap().starts_with("Stage 2 failed"));

        tokio::time::timeout(Duration::from_secs(5), controller.shutdown())
            .await
            .expect("shutdown hung");
        assert_eq!(controller.evict_expired(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_identity_conflict_fails_session() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![
            Behavior::Succeed(0.9, vec![("acme", "organization")]),
            Behavior::Succeed(0.9, vec![("acme", "person")]),
        ]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert_eq!(done.stages_completed(), 2);
        assert!(done.final_results.is_none());
        assert_eq!(
            done.error.as_deref(),
            Some("Identity conflict for entity 'acme': type 'organization' vs 'person'")
        );
    }
}

#[cfg(test)]
mod termination_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_terminate_before_first_stage() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9); 5]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        controller.terminate_session(&session.id).unwrap();

        let terminated = controller.get_session(&session.id).unwrap();
        assert_eq!(terminated.status, SessionStatus::Terminated);
        assert!(terminated.completed_at.is_some());

        let done = controller.wait_for_completion(&session.id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Terminated);
        assert!(done
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Pending && s.started_at.is_none()));
        assert!(done.final_results.is_none());
    }

    #[tokio::test]
    async fn test_terminate_interrupts_in_flight_stage() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![
            succeed(0.9),
            Behavior::HangInScope,
            succeed(0.9),
        ]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        wait_for_stage_status(&controller, &session.id, 1, StageStatus::Running).await;

        controller.terminate_session(&session.id).unwrap();
        let done = tokio::time::timeout(
            Duration::from_secs(2),
            controller.wait_for_completion(&session.id),
        )
        .await
        .expect("loop should exit promptly after termination")
        .unwrap();

        assert_eq!(done.status, SessionStatus::Terminated);
        assert_eq!(done.stages[0].status, StageStatus::Completed);
        assert_eq!(done.stages[1].status, StageStatus::Failed);
        assert_eq!(
            done.stages[1].error.as_deref(),
            Some("Stage cancelled: session terminated")
        );
        assert_eq!(done.stages[2].status, StageStatus::Pending);
        assert!(done.error.is_none());
        assert!(done.final_results.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_terminates_running_sessions() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![Behavior::HangInScope]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        wait_for_stage_status(&controller, &session.id, 0, StageStatus::Running).await;

        controller.shutdown().await;

        let done = controller.get_session(&session.id).unwrap();
        assert_eq!(done.status, SessionStatus::Terminated);
        assert_eq!(done.stages[0].status, StageStatus::Failed);
        assert!(matches!(
            controller.start_analysis(document(), None),
            Err(AnalysisError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9)]));

        assert!(matches!(
            controller.get_session("missing"),
            Err(AnalysisError::SessionNotFound { .. })
        ));
        assert!(matches!(
            controller.terminate_session("missing"),
            Err(AnalysisError::SessionNotFound { .. })
        ));
        assert!(matches!(
            controller.wait_for_completion("missing").await,
            Err(AnalysisError::SessionNotFound { .. })
        ));
        let err = controller.get_session("missing").unwrap_err();
        assert_eq!(err.to_string(), "Session not found: missing");
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_list_sessions_oldest_first() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9)]));

        let first = controller.start_analysis(document(), Some(config())).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = controller.start_analysis(document(), Some(config())).unwrap();

        let listed: Vec<String> = controller.list_sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_evict_keeps_recent_sessions() {
        let controller = AnalysisController::with_pipeline(pipeline(vec![succeed(0.9)]));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(controller.evict_expired(Duration::from_secs(3600)), 0);
        assert_eq!(controller.evict_expired(Duration::ZERO), 1);
        assert!(controller.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_retention_sweeper_evicts_and_stops_on_shutdown() {
        let controller = Arc::new(AnalysisController::with_pipeline(pipeline(vec![succeed(0.9)])));

        let session = controller.start_analysis(document(), Some(config())).unwrap();
        controller.wait_for_completion(&session.id).await.unwrap();

        let sweeper =
            controller.spawn_retention_sweeper(Duration::from_millis(10), Duration::ZERO);

        for _ in 0..100 {
            if controller.list_sessions().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(controller.list_sessions().is_empty());

        controller.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper should stop after shutdown")
            .unwrap();
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SURFACE: &str = r#"{
  "entities": [
    {"id": "jane_roe", "type": "person", "name": "Jane Roe", "confidence": 0.7},
    {"id": "acme", "type": "organization", "name": "Acme Corp", "confidence": 0.8}
  ],
  "relationships": [
    {"id": "payment_1", "type": "payment", "from_id": "jane_roe", "to_id": "acme", "confidence": 0.6}
  ],
  "confidence": 0.8
}"#;

    const DEEP: &str = r#"```json
{
  "entities": [
    {"id": "jane_roe", "type": "person", "name": "Jane Roe",
     "properties": {"influence_level": "high"}, "confidence": 0.9}
  ],
  "relationships": [],
  "insights": ["The mayor steers procurement"],
  "patterns": [],
  "confidence": 0.85
}
```"#;

    const CROSS_REFERENCE: &str = r#"{
  "validation_results": {"consistency_score": 0.9, "fact_check_score": 0.8,
                         "timeline_coherence": 0.9, "logical_consistency": 0.9},
  "issues_found": [],
  "validated_entities": [],
  "validated_relationships": [
    {"id": "payment_1", "type": "payment", "from_id": "jane_roe", "to_id": "acme", "confidence": 0.75}
  ],
  "evidence_chains": [
    {"claim": "Jane Roe approved a payment to Acme", "evidence": ["approved a payment"],
     "sources": ["document"], "confidence": 0.8}
  ],
  "confidence": 0.8
}"#;

    const HYPOTHESIS: &str = r#"{
  "hypotheses": [
    {"description": "The payment rewarded campaign support", "confidence": 0.4,
     "supporting": [], "conflicting": [], "questions": ["Did Acme donate?"]}
  ],
  "missing_information": [],
  "follow_up_questions": ["Who signed the contract?"],
  "confidence": 0.7
}"#;

    const REFINEMENT: &str = r#"{
  "final_entities": [
    {"id": "acme", "type": "organization", "name": "Acme Corporation", "confidence": 0.95}
  ],
  "final_relationships": [],
  "key_insights": ["Procurement rules were bypassed"],
  "next_steps": ["Request tender records"],
  "open_questions": [],
  "confidence": 0.9
}"#;

    #[tokio::test]
    async fn test_default_pipeline_end_to_end() {
        let pipes = PipeConfig::default();
        let client = Arc::new(ScriptedClient::new());
        client
            .reply(&pipes.surface, SURFACE)
            .reply(&pipes.deep_analysis, DEEP)
            .reply(&pipes.cross_reference, CROSS_REFERENCE)
            .reply(&pipes.hypothesis, HYPOTHESIS)
            .reply(&pipes.refinement, REFINEMENT);

        let controller = AnalysisController::new(client.clone(), &pipes);
        let session = controller
            .start_analysis(document(), Some(config().with_depth(5)))
            .unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed, "error: {:?}", done.error);
        assert_eq!(done.stages_completed(), 5);
        assert_eq!(client.remaining(), 0);

        let calls = client.calls();
        let called: Vec<&str> = calls.iter().map(|c| c.pipe.as_str()).collect();
        assert_eq!(
            called,
            vec![
                pipes.surface.as_str(),
                pipes.deep_analysis.as_str(),
                pipes.cross_reference.as_str(),
                pipes.hypothesis.as_str(),
                pipes.refinement.as_str(),
            ]
        );
        assert!(calls[4].streamed);
        assert!(calls[3].request.messages[1]
            .content
            .contains("Jane Roe approved a payment to Acme"));

        assert_eq!(done.evidence.len(), 1);
        assert_eq!(done.hypotheses.len(), 1);
        assert_eq!(done.stages[3].questions, vec!["Who signed the contract?"]);
        assert!(done.stages[3].results.is_none());

        let combined = done.final_results.unwrap();
        let entities: Vec<(&str, f64)> = combined
            .entities
            .iter()
            .map(|e| (e.id.as_str(), e.confidence))
            .collect();
        assert_eq!(entities, vec![("acme", 0.95), ("jane_roe", 0.9)]);
        assert_eq!(combined.entities[1].properties["influence_level"], json!("high"));
        assert_eq!(combined.relationships.len(), 1);
        assert_eq!(combined.relationships[0].confidence, 0.75);
        // Four partial results: surface, deep, cross-reference, refinement.
        assert!((combined.confidence - (0.8 + 0.85 + 0.8 + 0.9) / 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_default_pipeline_reasoning_failure() {
        let pipes = PipeConfig::default();
        let client = Arc::new(ScriptedClient::new());
        client
            .reply(&pipes.surface, SURFACE)
            .fail(&pipes.deep_analysis, "model overloaded");

        let controller = AnalysisController::new(client, &pipes);
        let session = controller.start_analysis(document(), Some(config())).unwrap();
        let done = controller.wait_for_completion(&session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert_eq!(done.stages[1].status, StageStatus::Failed);
        assert!(done.stages[1]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Reasoning call failed"));
    }
}
