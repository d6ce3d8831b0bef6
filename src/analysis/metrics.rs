/// Aggregate usage metrics over the loaded history
///
/// Everything here is computed in a single pass over the records, with
/// chain-level stats folded in from the already-built chains.

use crate::analysis::chains::{ChainType, QueryChain};
use crate::analysis::usage::UsageTracker;
use crate::db::QueryRecord;
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How many top entities/intents to keep in the report
const TOP_N: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub total_queries: usize,
    /// Fraction of queries that returned at least one result
    pub success_rate: f64,
    /// Average query length in words
    pub avg_query_length: f64,
    pub avg_entity_count: f64,
    pub hour_histogram: [u32; 24],
    /// Monday = index 0
    pub weekday_histogram: [u32; 7],
    pub top_entities: Vec<(String, u32)>,
    pub top_intents: Vec<(String, u32)>,
    pub avg_chain_length: f64,
    /// Fraction of chains classified as refinement chains
    pub refinement_rate: f64,
    pub avg_execution_time_ms: f64,
    pub max_execution_time_ms: i64,
}

impl UsageMetrics {
    /// Compute all metrics for one analysis pass.
    pub fn compute(
        records: &[QueryRecord],
        chains: &[QueryChain],
        usage: &UsageTracker,
    ) -> UsageMetrics {
        let mut metrics = UsageMetrics {
            total_queries: records.len(),
            ..Default::default()
        };

        if records.is_empty() {
            return metrics;
        }

        let mut successes = 0usize;
        let mut word_total = 0usize;
        let mut entity_total = 0usize;
        let mut intent_counts: HashMap<String, u32> = HashMap::new();
        let mut exec_total = 0i64;
        let mut exec_count = 0usize;

        for record in records {
            if record.had_results {
                successes += 1;
            }
            word_total += record.query_text.split_whitespace().count();
            entity_total += record.entities.len();
            metrics.hour_histogram[record.timestamp.hour() as usize] += 1;
            metrics.weekday_histogram
                [record.timestamp.weekday().num_days_from_monday() as usize] += 1;
            if let Some(intent) = &record.intent {
                *intent_counts.entry(intent.clone()).or_insert(0) += 1;
            }
            if let Some(ms) = record.execution_time_ms {
                exec_total += ms;
                exec_count += 1;
                metrics.max_execution_time_ms = metrics.max_execution_time_ms.max(ms);
            }
        }

        let n = records.len() as f64;
        metrics.success_rate = successes as f64 / n;
        metrics.avg_query_length = word_total as f64 / n;
        metrics.avg_entity_count = entity_total as f64 / n;
        metrics.top_entities = usage.top_entities(TOP_N);

        let mut intents: Vec<(String, u32)> = intent_counts.into_iter().collect();
        intents.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        intents.truncate(TOP_N);
        metrics.top_intents = intents;

        if exec_count > 0 {
            metrics.avg_execution_time_ms = exec_total as f64 / exec_count as f64;
        }

        if !chains.is_empty() {
            let total_len: usize = chains.iter().map(|c| c.len()).sum();
            metrics.avg_chain_length = total_len as f64 / chains.len() as f64;
            let refinements = chains
                .iter()
                .filter(|c| c.chain_type == ChainType::Refinement)
                .count();
            metrics.refinement_rate = refinements as f64 / chains.len() as f64;
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::chains::{ChainBuilder, ChainConfig};
    use chrono::{Duration, TimeZone, Utc};

    fn records() -> Vec<QueryRecord> {
        let base = Utc.with_ymd_and_hms(2026, 8, 24, 9, 0, 0).unwrap(); // Monday
        vec![
            QueryRecord {
                query_id: "q1".to_string(),
                timestamp: base,
                query_text: "show documents".to_string(),
                entities: vec!["documents".to_string()],
                intent: Some("search".to_string()),
                had_results: true,
                execution_time_ms: Some(30),
                result_count: Some(4),
            },
            QueryRecord {
                query_id: "q2".to_string(),
                timestamp: base + Duration::minutes(5),
                query_text: "show PDF documents".to_string(),
                entities: vec!["documents".to_string(), "PDF".to_string()],
                intent: Some("search".to_string()),
                had_results: false,
                execution_time_ms: Some(90),
                result_count: Some(0),
            },
        ]
    }

    #[test]
    fn test_single_pass_metrics() {
        let records = records();
        let mut usage = UsageTracker::new();
        for r in &records {
            usage.observe(r);
        }
        let chains = ChainBuilder::new(ChainConfig::default()).build(&records);

        let metrics = UsageMetrics::compute(&records, &chains, &usage);

        assert_eq!(metrics.total_queries, 2);
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.avg_query_length, 2.5);
        assert_eq!(metrics.avg_entity_count, 1.5);
        assert_eq!(metrics.hour_histogram[9], 2);
        assert_eq!(metrics.weekday_histogram[0], 2);
        assert_eq!(metrics.avg_execution_time_ms, 60.0);
        assert_eq!(metrics.max_execution_time_ms, 90);
        assert_eq!(metrics.avg_chain_length, 2.0);
        assert_eq!(metrics.refinement_rate, 1.0);
        assert_eq!(metrics.top_entities[0].0, "documents");
        assert_eq!(metrics.top_intents[0], ("search".to_string(), 2));
    }

    #[test]
    fn test_empty_history_metrics() {
        let metrics = UsageMetrics::compute(&[], &[], &UsageTracker::new());
        assert_eq!(metrics.total_queries, 0);
        assert_eq!(metrics.success_rate, 0.0);
    }
}
