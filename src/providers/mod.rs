/// Suggestion providers
///
/// Each provider is one independent heuristic source of suggestions. They
/// all implement the same contract: generation never fails just because a
/// signal is missing (it returns an empty list), and feedback only ever
/// mutates the provider's own counters.

pub mod activity;
pub mod entity;
pub mod history;
pub mod temporal;

pub use activity::ActivityContextProvider;
pub use entity::EntityRelationshipProvider;
pub use history::HistoryChainProvider;
pub use temporal::TemporalPatternProvider;

use crate::context::QueryContext;
use crate::error::Result;
use crate::scoring::Scorer;
use crate::suggestion::{FeedbackType, Suggestion, SuggestionSource};
use async_trait::async_trait;
use std::collections::HashMap;

/// Feedback with more results than this earns a bonus success increment
pub const RESULT_COUNT_BONUS_THRESHOLD: u32 = 5;

/// Shared contract for all suggestion providers.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    /// Which source this provider is registered under.
    fn source(&self) -> SuggestionSource;

    /// Generate up to `max_suggestions` candidates.
    ///
    /// Missing optional inputs (no current query, no activity data, no
    /// entities found) are normal: the provider returns an empty list
    /// rather than an error.
    async fn generate_suggestions(
        &self,
        current_query: Option<&str>,
        context: &QueryContext,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>>;

    /// Fold feedback into the provider's local learning counters.
    ///
    /// A no-op when the suggestion's `source_context` lacks the key this
    /// provider needs to identify what to update.
    async fn update_from_feedback(
        &self,
        suggestion: &Suggestion,
        feedback: FeedbackType,
        result_count: Option<u32>,
    );

    /// Weighted average of factor values; equal weights by default,
    /// 0.0 for an empty factor map, clamped to [0, 1].
    fn calculate_confidence(
        &self,
        factors: &HashMap<String, f64>,
        weights: Option<&HashMap<String, f64>>,
    ) -> f64 {
        Scorer::weighted_confidence(factors, weights)
    }
}

/// Whether feedback plus result count warrants the bonus increment.
pub(crate) fn bonus_applies(result_count: Option<u32>) -> bool {
    result_count.map(|c| c > RESULT_COUNT_BONUS_THRESHOLD).unwrap_or(false)
}

/// Success/failure counter pair used by provider learning state.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Tally {
    pub successes: u32,
    pub failures: u32,
}

impl Tally {
    pub fn record(&mut self, positive: bool, bonus: bool) {
        if positive {
            self.successes += 1;
            if bonus {
                self.successes += 1;
            }
        } else {
            self.failures += 1;
        }
    }

    pub fn ratio(&self) -> f64 {
        Scorer::success_ratio(self.successes, self.failures)
    }
}
