//! Sequential deepening analysis.
//!
//! A session walks a document through an ordered pipeline of stage
//! processors. Each stage sees the partial results of the stages before
//! it; the run stops early when a stage's confidence drops below the
//! threshold or the configured depth is reached, and the partial results
//! are merged into one combined result at the end.
//!
//! ```text
//! start_analysis ──► session loop ──► stage 1 ──► stage 2 ──► ... ──► combine_results
//!                        ▲
//! get / terminate ───────┘ (snapshots, cancellation)
//! ```

mod aggregator;
mod controller;
pub mod stages;
mod types;

pub use aggregator::combine_results;
pub use controller::AnalysisController;
pub use stages::{default_pipeline, StageInput, StageProcessor, StageScope};
pub use types::*;
