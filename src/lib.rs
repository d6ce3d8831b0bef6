/// query-suggest library
///
/// Contextual query-suggestion engine: analyzes query history for chains
/// and patterns, fans suggestion requests out to pluggable providers, and
/// learns from accept/reject feedback.

pub mod analysis;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod graph;
pub mod providers;
pub mod scoring;
pub mod suggestion;

// Re-exports for convenience
pub use analysis::QueryAnalyzer;
pub use context::QueryContext;
pub use db::Database;
pub use engine::{EngineSettings, RecommendationEngine};
pub use error::{Result, SuggestError};
pub use suggestion::{Feedback, FeedbackType, Suggestion, SuggestionSource};
