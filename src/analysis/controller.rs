//! Session registry and per-session execution loop.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::aggregator::combine_results;
use super::stages::{default_pipeline, StageInput, StageProcessor, StageScope};
use super::types::{
    AnalysisConfig, AnalysisSession, AnalysisStage, Document, SessionStatus, StageFindings,
    StageStatus,
};
use crate::config::PipeConfig;
use crate::error::{AnalysisError, AnalysisResult, StageError};
use crate::langbase::ReasoningClient;

/// One registered session plus the handles its loop is driven by.
struct SessionEntry {
    session: Mutex<AnalysisSession>,
    /// Cancelled on termination or controller shutdown.
    cancel: CancellationToken,
    /// Flips to `true` once the execution loop has exited.
    finished: watch::Sender<bool>,
}

impl SessionEntry {
    fn lock(&self) -> MutexGuard<'_, AnalysisSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> AnalysisSession {
        self.lock().clone()
    }

    async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Drives documents through the stage pipeline, one task per session.
///
/// Sessions live in an in-memory registry until evicted. Every method
/// returns point-in-time snapshots; the live record is only touched under
/// its own lock.
pub struct AnalysisController {
    pipeline: Vec<Arc<dyn StageProcessor>>,
    defaults: AnalysisConfig,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    shutdown: CancellationToken,
}

impl AnalysisController {
    /// Create a controller running the five default stages over `client`.
    pub fn new(client: Arc<dyn ReasoningClient>, pipes: &PipeConfig) -> Self {
        Self::with_pipeline(default_pipeline(client, pipes))
    }

    /// Create a controller over an explicit processor pipeline.
    pub fn with_pipeline(pipeline: Vec<Arc<dyn StageProcessor>>) -> Self {
        Self {
            pipeline,
            defaults: AnalysisConfig::default(),
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the configuration used when a caller supplies none.
    pub fn with_defaults(mut self, defaults: AnalysisConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Number of registered processors.
    pub fn pipeline_len(&self) -> usize {
        self.pipeline.len()
    }

    /// Start analysing `document` and return the initial snapshot.
    ///
    /// Schedules `min(max_stages, pipeline_len)` stages and spawns the
    /// session's execution loop; does not wait for any stage. Must be
    /// called from within a Tokio runtime.
    pub fn start_analysis(
        &self,
        document: Document,
        config: Option<AnalysisConfig>,
    ) -> AnalysisResult<AnalysisSession> {
        if self.shutdown.is_cancelled() {
            return Err(AnalysisError::ShuttingDown);
        }

        let config = config.unwrap_or_else(|| self.defaults.clone());
        let scheduled = config.max_stages.min(self.pipeline.len());
        if scheduled < config.max_stages {
            debug!(
                requested = config.max_stages,
                available = self.pipeline.len(),
                "Clamping max_stages to pipeline length"
            );
        }

        let mut session = AnalysisSession::new(document.id.clone(), config);
        let session_id = session.id.clone();
        session.stages = self.pipeline[..scheduled]
            .iter()
            .enumerate()
            .map(|(index, processor)| {
                AnalysisStage::new(&session_id, index + 1, processor.name(), processor.description())
            })
            .collect();
        let snapshot = session.clone();

        let (finished, _) = watch::channel(false);
        let entry = Arc::new(SessionEntry {
            session: Mutex::new(session),
            cancel: self.shutdown.child_token(),
            finished,
        });
        self.write_sessions()
            .insert(session_id.clone(), Arc::clone(&entry));

        info!(
            session_id = %session_id,
            document_id = %document.id,
            stages = scheduled,
            depth = snapshot.config.depth,
            "Analysis session started"
        );

        let pipeline = self.pipeline[..scheduled].to_vec();
        let span = info_span!("analysis_session", session_id = %session_id);
        tokio::spawn(run_session(entry, pipeline, document).instrument(span));

        Ok(snapshot)
    }

    /// Point-in-time snapshot of a session.
    pub fn get_session(&self, session_id: &str) -> AnalysisResult<AnalysisSession> {
        Ok(self.entry(session_id)?.snapshot())
    }

    /// Terminate a session.
    ///
    /// A running session is marked terminated at once and its in-flight
    /// stage is interrupted; no further stage starts. Terminating a session
    /// that already finished leaves it unchanged.
    pub fn terminate_session(&self, session_id: &str) -> AnalysisResult<()> {
        let entry = self.entry(session_id)?;
        if entry.lock().finish(SessionStatus::Terminated) {
            info!(session_id = %session_id, "Analysis session terminated");
        } else {
            debug!(session_id = %session_id, "Terminate ignored, session already finished");
        }
        entry.cancel.cancel();
        Ok(())
    }

    /// Snapshots of every registered session, oldest first.
    pub fn list_sessions(&self) -> Vec<AnalysisSession> {
        let entries: Vec<Arc<SessionEntry>> = self.read_sessions().values().cloned().collect();
        let mut sessions: Vec<AnalysisSession> = entries.iter().map(|e| e.snapshot()).collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Drop finished sessions that completed more than `max_age` ago.
    ///
    /// Running sessions are never evicted. Returns how many were removed.
    pub fn evict_expired(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.write_sessions();
        let before = sessions.len();

        sessions.retain(|_, entry| {
            let session = entry.lock();
            let expired = session.status.is_terminal()
                && session
                    .completed_at
                    .and_then(|at| (now - at).to_std().ok())
                    .map(|age| age >= max_age)
                    .unwrap_or(false);
            !expired
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted expired sessions");
        }
        evicted
    }

    /// Periodically evict expired sessions until shutdown.
    pub fn spawn_retention_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(controller) = controller.upgrade() else { break };
                        controller.evict_expired(max_age);
                    }
                }
            }
            debug!("Retention sweeper stopped");
        })
    }

    /// Wait for a session's execution loop to exit and return the final snapshot.
    pub async fn wait_for_completion(&self, session_id: &str) -> AnalysisResult<AnalysisSession> {
        let entry = self.entry(session_id)?;
        entry.wait_finished().await;
        Ok(entry.snapshot())
    }

    /// Stop accepting sessions, cancel every running loop and wait for them to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down analysis controller");
        self.shutdown.cancel();

        let entries: Vec<Arc<SessionEntry>> = self.read_sessions().values().cloned().collect();
        for entry in entries {
            entry.wait_finished().await;
        }
    }

    fn entry(&self, session_id: &str) -> AnalysisResult<Arc<SessionEntry>> {
        self.read_sessions()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AnalysisError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    fn read_sessions(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<SessionEntry>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<SessionEntry>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the session when its loop exits, including by panic or abort.
///
/// A loop that unwinds mid-stage leaves the session `running`; the guard
/// fails the in-flight stage and the session so waiters and eviction see
/// a terminal state.
struct LoopGuard {
    entry: Arc<SessionEntry>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        {
            let mut session = self.entry.lock();
            if session.status == SessionStatus::Running {
                let index = session.current_stage;
                let mut message = "execution loop aborted".to_string();
                if let Some(stage) = session.stages.get_mut(index) {
                    if stage.status == StageStatus::Running {
                        let _ = stage.fail(message.clone());
                        message = format!("Stage {} failed: {}", stage.stage, message);
                    }
                }
                error!(session_id = %session.id, error = %message, "Analysis loop aborted");
                session.error = Some(message);
                session.finish(SessionStatus::Failed);
            }
        }
        self.entry.finished.send_replace(true);
    }
}

/// Why the stage loop stopped.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LoopExit {
    Exhausted,
    LowConfidence,
    DepthReached,
    Stopped,
}

/// Execution loop for one session.
///
/// The session lock is never held across an await: each stage runs on a
/// private copy of its record, which is written back once it resolves.
async fn run_session(
    entry: Arc<SessionEntry>,
    pipeline: Vec<Arc<dyn StageProcessor>>,
    document: Document,
) {
    let (session_id, config) = {
        let session = entry.lock();
        (session.id.clone(), session.config.clone())
    };
    let started = Instant::now();
    let _guard = LoopGuard {
        entry: Arc::clone(&entry),
    };

    let mut previous = Vec::new();
    let mut evidence = Vec::new();
    let mut hypotheses = Vec::new();
    let mut executed: u32 = 0;
    let mut exit = LoopExit::Exhausted;

    for (index, processor) in pipeline.iter().enumerate() {
        let mut stage = {
            let mut session = entry.lock();
            if entry.cancel.is_cancelled() {
                session.finish(SessionStatus::Terminated);
            }
            if session.status != SessionStatus::Running {
                exit = LoopExit::Stopped;
                break;
            }
            if let Err(e) = session.stages[index].begin() {
                session.error = Some(e.to_string());
                session.finish(SessionStatus::Failed);
                exit = LoopExit::Stopped;
                break;
            }
            session.current_stage = index;
            session.stages[index].clone()
        };

        info!(stage = stage.stage, name = %stage.name, "Stage started");
        let stage_start = Instant::now();

        let mut findings = StageFindings::default();
        let input = StageInput {
            session_id: &session_id,
            config: &config,
            document: &document,
            previous: &previous,
            evidence: &evidence,
            hypotheses: &hypotheses,
        };
        let scope = StageScope::new(entry.cancel.clone(), config.timeout_per_stage());

        let outcome = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => Err(StageError::Cancelled),
            res = tokio::time::timeout(
                config.timeout_per_stage(),
                processor.process(&scope, input, &mut stage, &mut findings),
            ) => res.unwrap_or(Err(StageError::Timeout {
                timeout_ms: config.timeout_per_stage_ms,
            })),
        };

        let mut session = entry.lock();
        match outcome {
            Err(err) => {
                let message = err.to_string();
                error!(
                    stage = stage.stage,
                    name = %stage.name,
                    error = %message,
                    latency_ms = stage_start.elapsed().as_millis(),
                    "Stage failed"
                );
                if let Err(e) = stage.fail(message.clone()) {
                    warn!(error = %e, "Could not record stage failure");
                }
                let ordinal = stage.stage;
                session.stages[index] = stage;

                let status = match err {
                    StageError::Cancelled => SessionStatus::Terminated,
                    _ => SessionStatus::Failed,
                };
                if session.finish(status) && status == SessionStatus::Failed {
                    session.error = Some(format!("Stage {} failed: {}", ordinal, message));
                }
                exit = LoopExit::Stopped;
                break;
            }
            Ok(()) => {
                if let Err(e) = stage.complete() {
                    warn!(error = %e, "Could not record stage completion");
                }
                executed += 1;

                info!(
                    stage = stage.stage,
                    name = %stage.name,
                    confidence = stage.confidence,
                    has_results = stage.results.is_some(),
                    evidence = findings.evidence.len(),
                    hypotheses = findings.hypotheses.len(),
                    latency_ms = stage_start.elapsed().as_millis(),
                    "Stage completed"
                );

                if let Some(result) = &stage.results {
                    previous.push(result.clone());
                }
                session.evidence.extend(findings.evidence.iter().cloned());
                session.hypotheses.extend(findings.hypotheses.iter().cloned());
                evidence.extend(findings.evidence);
                hypotheses.extend(findings.hypotheses);

                let confidence = stage.confidence;
                session.stages[index] = stage;

                if confidence < config.confidence_threshold {
                    info!(
                        confidence,
                        threshold = config.confidence_threshold,
                        "Stopping early, confidence below threshold"
                    );
                    exit = LoopExit::LowConfidence;
                    break;
                }
                if executed >= config.depth {
                    info!(executed, depth = config.depth, "Stopping early, depth reached");
                    exit = LoopExit::DepthReached;
                    break;
                }
            }
        }
    }

    {
        let mut session = entry.lock();
        if session.status == SessionStatus::Running {
            match combine_results(&previous) {
                Ok(final_results) => {
                    session.final_results = final_results;
                    session.finish(SessionStatus::Completed);
                }
                Err(e) => {
                    error!(error = %e, "Result aggregation failed");
                    session.error = Some(e.to_string());
                    session.finish(SessionStatus::Failed);
                }
            }
        }

        info!(
            status = %session.status,
            exit = ?exit,
            stages_completed = session.stages_completed(),
            partial_results = previous.len(),
            latency_ms = started.elapsed().as_millis(),
            "Analysis session finished"
        );
    }
}
