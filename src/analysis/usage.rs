/// Incremental per-entity usage bookkeeping
///
/// `EntityUsage` is updated one entity at a time as each historical query
/// is processed. Existing entries are never recomputed from scratch; a
/// fresh analysis pass starts from an empty tracker.

use crate::db::QueryRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cap on stored example query texts per entity
const MAX_EXAMPLE_QUERIES: usize = 5;

/// Rolling usage statistics for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityUsage {
    pub name: String,
    pub mention_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// How often other entities appeared in the same query
    pub co_occurrence: HashMap<String, u32>,
    /// Intent-label histogram
    pub intents: HashMap<String, u32>,
    success_count: u32,
    /// Bounded list of example query texts
    pub example_queries: Vec<String>,
}

impl EntityUsage {
    fn new(name: &str, at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            mention_count: 0,
            first_seen: at,
            last_seen: at,
            co_occurrence: HashMap::new(),
            intents: HashMap::new(),
            success_count: 0,
            example_queries: Vec::new(),
        }
    }

    /// Fraction of mentions whose query returned results.
    pub fn success_rate(&self) -> f64 {
        if self.mention_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.mention_count as f64
        }
    }
}

/// Accumulates `EntityUsage` across a history pass.
#[derive(Debug, Default)]
pub struct UsageTracker {
    entities: HashMap<String, EntityUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one historical query into the tracker, entity by entity.
    pub fn observe(&mut self, record: &QueryRecord) {
        let entities = record.entities_lower();

        for entity in &entities {
            let usage = self
                .entities
                .entry(entity.clone())
                .or_insert_with(|| EntityUsage::new(entity, record.timestamp));

            usage.mention_count += 1;
            if record.timestamp < usage.first_seen {
                usage.first_seen = record.timestamp;
            }
            if record.timestamp > usage.last_seen {
                usage.last_seen = record.timestamp;
            }
            if record.had_results {
                usage.success_count += 1;
            }
            if let Some(intent) = &record.intent {
                *usage.intents.entry(intent.clone()).or_insert(0) += 1;
            }
            for other in &entities {
                if other != entity {
                    *usage.co_occurrence.entry(other.clone()).or_insert(0) += 1;
                }
            }
            if usage.example_queries.len() < MAX_EXAMPLE_QUERIES
                && !usage.example_queries.contains(&record.query_text)
            {
                usage.example_queries.push(record.query_text.clone());
            }
        }
    }

    pub fn get(&self, entity: &str) -> Option<&EntityUsage> {
        self.entities.get(&entity.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityUsage> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities by mention count, most used first.
    pub fn top_entities(&self, limit: usize) -> Vec<(String, u32)> {
        let mut all: Vec<(String, u32)> = self
            .entities
            .values()
            .map(|u| (u.name.clone(), u.mention_count))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all.truncate(limit);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(text: &str, entities: &[&str], had_results: bool, minutes_ago: i64) -> QueryRecord {
        QueryRecord {
            query_id: format!("q-{}", minutes_ago),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            query_text: text.to_string(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
            intent: Some("search".to_string()),
            had_results,
            execution_time_ms: None,
            result_count: None,
        }
    }

    #[test]
    fn test_incremental_counts() {
        let mut tracker = UsageTracker::new();
        tracker.observe(&record("find python docs", &["python", "docs"], true, 60));
        tracker.observe(&record("python tutorials", &["python"], false, 30));

        let python = tracker.get("python").unwrap();
        assert_eq!(python.mention_count, 2);
        assert_eq!(python.success_rate(), 0.5);
        assert_eq!(*python.co_occurrence.get("docs").unwrap(), 1);
        assert_eq!(*python.intents.get("search").unwrap(), 2);
    }

    #[test]
    fn test_first_and_last_seen() {
        let mut tracker = UsageTracker::new();
        tracker.observe(&record("a python", &["python"], true, 120));
        tracker.observe(&record("b python", &["python"], true, 10));

        let python = tracker.get("python").unwrap();
        assert!(python.first_seen < python.last_seen);
    }

    #[test]
    fn test_example_queries_capped() {
        let mut tracker = UsageTracker::new();
        for i in 0..10 {
            tracker.observe(&record(&format!("python query {}", i), &["python"], true, i));
        }
        assert_eq!(tracker.get("python").unwrap().example_queries.len(), 5);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut tracker = UsageTracker::new();
        tracker.observe(&record("about Python", &["Python"], true, 5));
        assert!(tracker.get("PYTHON").is_some());
    }

    #[test]
    fn test_top_entities_ordering() {
        let mut tracker = UsageTracker::new();
        tracker.observe(&record("a", &["python", "docs"], true, 3));
        tracker.observe(&record("b", &["python"], true, 2));

        let top = tracker.top_entities(10);
        assert_eq!(top[0].0, "python");
        assert_eq!(top[0].1, 2);
    }
}
