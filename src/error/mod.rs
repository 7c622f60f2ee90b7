use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Orchestrator errors reported to callers of the analysis controller
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Analysis controller is shutting down")]
    ShuttingDown,

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Identity conflict for {kind} '{id}': type '{existing_type}' vs '{incoming_type}'")]
    IdentityConflict {
        kind: &'static str,
        id: String,
        existing_type: String,
        incoming_type: String,
    },
}

/// Errors raised while a single stage runs.
///
/// These never reach callers directly; the execution loop records their
/// text on the failed stage and on the session.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage deadline exceeded after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Stage cancelled: session terminated")]
    Cancelled,

    #[error("Reasoning call failed: {0}")]
    Reasoning(#[from] LangbaseError),

    #[error("Invalid stage response: {message}")]
    InvalidResponse { message: String },

    #[error("Missing stage input: {message}")]
    MissingInput { message: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for analysis controller operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Result type alias for stage processing
pub type StageResult<T> = Result<T, StageError>;
