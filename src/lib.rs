//! # Sequential Analysis
//!
//! Drives documents through an ordered pipeline of LLM-backed analysis
//! stages, each one deepening what the previous stages found, and merges
//! the partial results into one deduplicated entity/relationship set.
//!
//! ## Stages
//!
//! - **Surface Extraction**: entities and relationships stated in the text
//! - **Deep Analysis**: roles, motivations, influence and patterns
//! - **Cross-Reference Validation**: consistency checks and evidence chains
//! - **Hypothesis Generation**: explanations and missing information
//! - **Recursive Refinement**: streamed final synthesis
//!
//! ## Architecture
//!
//! ```text
//! Caller → AnalysisController → StageProcessor × 5 → Langbase Pipes (HTTP)
//!               ↓
//!      in-memory session registry
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sequential_analysis::{AnalysisController, Config, Document};
//! use sequential_analysis::langbase::LangbaseClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = Arc::new(LangbaseClient::new(&config.langbase, config.request.clone())?);
//!     let controller = AnalysisController::new(client, &config.pipes)
//!         .with_defaults(config.analysis.clone());
//!
//!     let session = controller.start_analysis(Document::new("doc-1", "..."), None)?;
//!     let finished = controller.wait_for_completion(&session.id).await?;
//!     println!("{:?}", finished.final_results);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Sessions, stage processors, the controller and result aggregation.
pub mod analysis;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// System prompts for the stage pipes.
pub mod prompts;

pub use analysis::{AnalysisConfig, AnalysisController, AnalysisSession, Document};
pub use config::Config;
pub use error::{AppError, AppResult};
