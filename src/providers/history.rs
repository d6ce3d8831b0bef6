// History chain provider
//
// If the current query looks like the start of a session the user has
// run before, the next step of that old session is probably the next
// query they want. Without a current query it falls back to the closing
// queries of recent successful chains.

use crate::analysis::{ChainType, QueryChain};
use crate::context::QueryContext;
use crate::error::Result;
use crate::providers::{bonus_applies, SuggestionProvider, Tally};
use crate::scoring::Scorer;
use crate::suggestion::{FeedbackType, Suggestion, SuggestionSource};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// Minimum similarity between the current query and a chain member
/// before the chain's next step becomes a candidate
const MIN_MEMBER_SIMILARITY: f64 = 0.6;

/// Chains below this success rate are not worth replaying cold
const MIN_COLD_SUCCESS_RATE: f64 = 0.5;

/// Confidence blend weights for chain-derived suggestions
fn blend_weights() -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    weights.insert("similarity".to_string(), 0.35);
    weights.insert("chain_success".to_string(), 0.3);
    weights.insert("recency".to_string(), 0.2);
    weights.insert("type_history".to_string(), 0.15);
    weights
}

#[derive(Default)]
struct ChainLearning {
    by_type: HashMap<String, Tally>,
}

pub struct HistoryChainProvider {
    chains: RwLock<Vec<QueryChain>>,
    learning: RwLock<ChainLearning>,
}

impl HistoryChainProvider {
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(Vec::new()),
            learning: RwLock::new(ChainLearning::default()),
        }
    }

    /// Replace the chain set with the latest analysis pass output.
    /// Learning counters survive across passes.
    pub fn ingest_chains(&self, chains: Vec<QueryChain>) {
        *self.chains.write().unwrap_or_else(|e| e.into_inner()) = chains;
    }

    pub fn chain_count(&self) -> usize {
        self.chains.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn type_ratio(&self, chain_type: ChainType) -> f64 {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_type
            .get(&chain_type_key(chain_type))
            .map(Tally::ratio)
            .unwrap_or(0.5)
    }

    #[cfg(test)]
    fn tally_for(&self, chain_type: ChainType) -> (u32, u32) {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_type
            .get(&chain_type_key(chain_type))
            .map(|t| (t.successes, t.failures))
            .unwrap_or((0, 0))
    }

    /// Candidates matching the current query: the step after any chain
    /// member similar enough to it.
    fn follow_up_candidates(
        &self,
        current_query: &str,
        now: chrono::DateTime<Utc>,
    ) -> Vec<Suggestion> {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        let weights = blend_weights();
        let mut candidates = Vec::new();

        for chain in chains.iter() {
            let recency = Scorer::recency_weight(
                (now - chain.ended_at).num_hours().max(0) as f64 / 24.0,
            );
            let type_ratio = self.type_ratio(chain.chain_type);

            for i in 0..chain.query_texts.len().saturating_sub(1) {
                let member = &chain.query_texts[i];
                let next = &chain.query_texts[i + 1];

                let similarity = Scorer::text_similarity(current_query, member);
                if similarity < MIN_MEMBER_SIMILARITY {
                    continue;
                }
                if next.to_lowercase() == current_query.to_lowercase() {
                    continue;
                }

                let mut factors = HashMap::new();
                factors.insert("similarity".to_string(), similarity);
                factors.insert("chain_success".to_string(), chain.success_rate);
                factors.insert("recency".to_string(), recency);
                factors.insert("type_history".to_string(), type_ratio);
                let confidence = self.calculate_confidence(&factors, Some(&weights));

                let mut suggestion = Suggestion::new(
                    next.clone(),
                    format!("You usually follow '{}' with '{}'", member, next),
                    confidence,
                    SuggestionSource::History,
                )
                .with_context("chain_id", chain.id.to_string())
                .with_context("chain_type", chain_type_key(chain.chain_type));
                for (name, value) in factors {
                    suggestion = suggestion.with_factor(name, value);
                }
                candidates.push(suggestion);
            }
        }

        candidates
    }

    /// Cold candidates: the refined closing query of recent successful
    /// chains.
    fn cold_candidates(&self, now: chrono::DateTime<Utc>) -> Vec<Suggestion> {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        let weights = blend_weights();
        let mut candidates = Vec::new();

        for chain in chains.iter() {
            if chain.success_rate < MIN_COLD_SUCCESS_RATE {
                continue;
            }
            let Some(last) = chain.query_texts.last() else {
                continue;
            };

            let recency = Scorer::recency_weight(
                (now - chain.ended_at).num_hours().max(0) as f64 / 24.0,
            );

            let mut factors = HashMap::new();
            factors.insert("chain_success".to_string(), chain.success_rate);
            factors.insert("recency".to_string(), recency);
            factors.insert(
                "type_history".to_string(),
                self.type_ratio(chain.chain_type),
            );
            let confidence = self.calculate_confidence(&factors, Some(&weights));

            let mut suggestion = Suggestion::new(
                last.clone(),
                "This search worked well for you recently".to_string(),
                confidence,
                SuggestionSource::History,
            )
            .with_context("chain_id", chain.id.to_string())
            .with_context("chain_type", chain_type_key(chain.chain_type));
            for (name, value) in factors {
                suggestion = suggestion.with_factor(name, value);
            }
            candidates.push(suggestion);
        }

        candidates
    }
}

impl Default for HistoryChainProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SuggestionProvider for HistoryChainProvider {
    fn source(&self) -> SuggestionSource {
        SuggestionSource::History
    }

    async fn generate_suggestions(
        &self,
        current_query: Option<&str>,
        context: &QueryContext,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>> {
        let now = context.reference_time_or_now();

        let mut candidates = match current_query {
            Some(query) if !query.trim().is_empty() => self.follow_up_candidates(query, now),
            _ => self.cold_candidates(now),
        };

        // Best confidence per suggested text wins
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut seen: Vec<String> = Vec::new();
        candidates.retain(|s| {
            let key = s.text.to_lowercase();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });

        candidates.truncate(max_suggestions);
        Ok(candidates)
    }

    async fn update_from_feedback(
        &self,
        suggestion: &Suggestion,
        feedback: FeedbackType,
        result_count: Option<u32>,
    ) {
        let Some(chain_type) = suggestion.source_context.get("chain_type") else {
            return;
        };
        if !feedback.is_positive() && !feedback.is_negative() {
            return;
        }

        let mut learning = self.learning.write().unwrap_or_else(|e| e.into_inner());
        learning
            .by_type
            .entry(chain_type.clone())
            .or_default()
            .record(feedback.is_positive(), bonus_applies(result_count));
    }
}

fn chain_type_key(chain_type: ChainType) -> String {
    format!("{:?}", chain_type).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ChainBuilder, ChainConfig};
    use crate::db::QueryRecord;
    use chrono::Duration;

    fn record(id: &str, text: &str, entities: &[&str], minutes: i64, had_results: bool) -> QueryRecord {
        QueryRecord {
            query_id: id.to_string(),
            timestamp: Utc::now() - Duration::hours(20) + Duration::minutes(minutes),
            query_text: text.to_string(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
            intent: None,
            had_results,
            execution_time_ms: None,
            result_count: None,
        }
    }

    fn provider_with_session() -> HistoryChainProvider {
        let records = vec![
            record("q1", "show documents", &["documents"], 0, true),
            record("q2", "show PDF documents", &["documents", "pdf"], 5, true),
            record(
                "q3",
                "show PDF documents from last week",
                &["documents", "pdf"],
                10,
                true,
            ),
        ];
        let chains = ChainBuilder::new(ChainConfig::default()).build(&records);
        assert_eq!(chains.len(), 1);

        let provider = HistoryChainProvider::new();
        provider.ingest_chains(chains);
        provider
    }

    #[tokio::test]
    async fn test_follow_up_from_matching_chain() {
        let provider = provider_with_session();
        let context = QueryContext::new();

        let suggestions = provider
            .generate_suggestions(Some("show documents"), &context, 5)
            .await
            .unwrap();

        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].text, "show PDF documents");
        assert!(suggestions[0].rationale.contains("You usually follow"));
        assert!(suggestions[0].confidence > 0.0 && suggestions[0].confidence <= 1.0);
        assert!(suggestions[0].source_context.contains_key("chain_id"));
    }

    #[tokio::test]
    async fn test_no_chains_means_no_suggestions() {
        let provider = HistoryChainProvider::new();
        let context = QueryContext::new();

        let suggestions = provider
            .generate_suggestions(Some("show documents"), &context, 5)
            .await
            .unwrap();
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_query_matches_nothing() {
        let provider = provider_with_session();
        let context = QueryContext::new();

        let suggestions = provider
            .generate_suggestions(Some("play jazz music"), &context, 5)
            .await
            .unwrap();
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_cold_start_surfaces_successful_chain_end() {
        let provider = provider_with_session();
        let context = QueryContext::new();

        let suggestions = provider.generate_suggestions(None, &context, 5).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].text, "show PDF documents from last week");
    }

    #[tokio::test]
    async fn test_max_suggestions_respected() {
        let provider = provider_with_session();
        let context = QueryContext::new();

        let suggestions = provider
            .generate_suggestions(Some("show documents"), &context, 1)
            .await
            .unwrap();
        assert!(suggestions.len() <= 1);
    }

    #[tokio::test]
    async fn test_feedback_increments_exactly_once() {
        let provider = provider_with_session();
        let context = QueryContext::new();
        let suggestions = provider
            .generate_suggestions(Some("show documents"), &context, 5)
            .await
            .unwrap();
        let suggestion = &suggestions[0];

        provider
            .update_from_feedback(suggestion, FeedbackType::Accepted, Some(2))
            .await;
        assert_eq!(provider.tally_for(ChainType::Refinement), (1, 0));

        provider
            .update_from_feedback(suggestion, FeedbackType::Accepted, Some(10))
            .await;
        // One regular plus one bonus increment
        assert_eq!(provider.tally_for(ChainType::Refinement), (3, 0));

        provider
            .update_from_feedback(suggestion, FeedbackType::Rejected, None)
            .await;
        assert_eq!(provider.tally_for(ChainType::Refinement), (3, 1));
    }

    #[tokio::test]
    async fn test_feedback_without_chain_type_is_noop() {
        let provider = provider_with_session();
        let stray = Suggestion::new("anything", "stray", 0.4, SuggestionSource::History);
        provider
            .update_from_feedback(&stray, FeedbackType::Accepted, None)
            .await;
        assert_eq!(provider.tally_for(ChainType::Refinement), (0, 0));
    }
}
