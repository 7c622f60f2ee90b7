use std::env;
use std::str::FromStr;

use crate::analysis::AnalysisConfig;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub analysis: AnalysisConfig,
    pub retention: RetentionConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe names, one per analysis stage
#[derive(Debug, Clone, PartialEq)]
pub struct PipeConfig {
    pub surface: String,
    pub deep_analysis: String,
    pub cross_reference: String,
    pub hypothesis: String,
    pub refinement: String,
}

/// Session registry retention policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionConfig {
    /// How long a finished session stays queryable.
    pub max_age_secs: u64,
    /// How often the sweeper looks for expired sessions.
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_var("MAX_RETRIES", 3),
            retry_delay_ms: parse_var("RETRY_DELAY_MS", 1000),
        };

        let defaults = PipeConfig::default();
        let pipes = PipeConfig {
            surface: env::var("PIPE_SURFACE").unwrap_or(defaults.surface),
            deep_analysis: env::var("PIPE_DEEP_ANALYSIS").unwrap_or(defaults.deep_analysis),
            cross_reference: env::var("PIPE_CROSS_REFERENCE").unwrap_or(defaults.cross_reference),
            hypothesis: env::var("PIPE_HYPOTHESIS").unwrap_or(defaults.hypothesis),
            refinement: env::var("PIPE_REFINEMENT").unwrap_or(defaults.refinement),
        };

        let base = AnalysisConfig::default();
        let analysis = AnalysisConfig::default()
            .with_depth(parse_var("ANALYSIS_DEPTH", base.depth))
            .with_max_stages(parse_var("ANALYSIS_MAX_STAGES", base.max_stages))
            .with_confidence_threshold(parse_var(
                "ANALYSIS_CONFIDENCE_THRESHOLD",
                base.confidence_threshold,
            ))
            .with_timeout_per_stage_ms(parse_var(
                "ANALYSIS_STAGE_TIMEOUT_MS",
                base.timeout_per_stage_ms,
            ))
            .with_cross_reference(parse_var(
                "ANALYSIS_CROSS_REFERENCE",
                base.enable_cross_reference,
            ))
            .with_hypotheses(parse_var("ANALYSIS_HYPOTHESES", base.enable_hypotheses));

        let retention = RetentionConfig {
            max_age_secs: parse_var("SESSION_RETENTION_SECS", 3600),
            sweep_interval_secs: parse_var("SESSION_SWEEP_INTERVAL_SECS", 300),
        };

        Ok(Config {
            langbase,
            logging,
            request,
            pipes,
            analysis,
            retention,
        })
    }
}

/// Read and parse an environment variable, falling back to `default`
/// when it is unset or malformed.
fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            surface: "surface-extraction-v1".to_string(),
            deep_analysis: "deep-analysis-v1".to_string(),
            cross_reference: "cross-reference-v1".to_string(),
            hypothesis: "hypothesis-generation-v1".to_string(),
            refinement: "recursive-refinement-v1".to_string(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}
