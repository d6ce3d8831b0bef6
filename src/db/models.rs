/// Data models for persisted rows
///
/// Rows map to the tables in schema.sql; JSON columns stay as strings on
/// the row structs (sqlx FromRow) and convert into domain values through
/// helper methods, never failing on malformed JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One entry of the query history log, as stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueryRow {
    pub id: i64,
    pub query_id: String,
    pub query_text: String,
    pub timestamp: String, // RFC 3339
    pub entities: Option<String>, // JSON array
    pub intent: Option<String>,
    pub had_results: bool,
    pub execution_time_ms: Option<i64>,
    pub result_count: Option<i64>,
}

impl QueryRow {
    /// Convert to the domain record the analyzer works with.
    pub fn into_record(self) -> QueryRecord {
        let entities = self
            .entities
            .as_deref()
            .and_then(|e| serde_json::from_str(e).ok())
            .unwrap_or_default();
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        QueryRecord {
            query_id: self.query_id,
            timestamp,
            query_text: self.query_text,
            entities,
            intent: self.intent,
            had_results: self.had_results,
            execution_time_ms: self.execution_time_ms,
            result_count: self.result_count,
        }
    }
}

/// One historical query, the shape every analysis pass consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: String,
    pub timestamp: DateTime<Utc>,
    pub query_text: String,
    pub entities: Vec<String>,
    pub intent: Option<String>,
    pub had_results: bool,
    pub execution_time_ms: Option<i64>,
    pub result_count: Option<i64>,
}

impl QueryRecord {
    /// Lowercased entity list, the form used for overlap comparisons.
    pub fn entities_lower(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.to_lowercase()).collect()
    }
}

/// Input for recording a new history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryInput {
    pub query_text: String,
    pub entities: Vec<String>,
    pub intent: Option<String>,
    pub had_results: bool,
    pub execution_time_ms: Option<i64>,
    pub result_count: Option<i64>,
    /// Defaults to now; tests and importers can backdate
    pub timestamp: Option<DateTime<Utc>>,
}

impl QueryInput {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            entities: Vec::new(),
            intent: None,
            had_results: false,
            execution_time_ms: None,
            result_count: None,
            timestamp: None,
        }
    }

    pub fn with_entities(mut self, entities: &[&str]) -> Self {
        self.entities = entities.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_results(mut self, result_count: i64) -> Self {
        self.had_results = result_count > 0;
        self.result_count = Some(result_count);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A suggestion as appended to the sink.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SuggestionRow {
    pub id: String,
    pub source: String,
    pub suggestion_text: String,
    pub rationale: Option<String>,
    pub confidence: f64,
    pub tags: Option<String>,           // JSON array
    pub source_context: Option<String>, // JSON object
    pub created_at: String,             // RFC 3339
}

/// A feedback event as appended to the sink.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRow {
    pub id: String,
    pub suggestion_id: String,
    pub feedback_type: String,
    pub result_count: Option<i64>,
    pub created_at: String, // RFC 3339
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_row_into_record() {
        let row = QueryRow {
            id: 1,
            query_id: "q1".to_string(),
            query_text: "find python docs".to_string(),
            timestamp: "2026-08-24T09:00:00+00:00".to_string(),
            entities: Some(r#"["python","docs"]"#.to_string()),
            intent: Some("search".to_string()),
            had_results: true,
            execution_time_ms: Some(40),
            result_count: Some(12),
        };

        let record = row.into_record();
        assert_eq!(record.entities, vec!["python", "docs"]);
        assert!(record.had_results);
        assert_eq!(record.timestamp.to_rfc3339(), "2026-08-24T09:00:00+00:00");
    }

    #[test]
    fn test_malformed_entities_become_empty() {
        let row = QueryRow {
            id: 1,
            query_id: "q1".to_string(),
            query_text: "x".to_string(),
            timestamp: "2026-08-24T09:00:00+00:00".to_string(),
            entities: Some("not json".to_string()),
            intent: None,
            had_results: false,
            execution_time_ms: None,
            result_count: None,
        };

        assert!(row.into_record().entities.is_empty());
    }

    #[test]
    fn test_query_input_builder() {
        let input = QueryInput::new("show reports")
            .with_entities(&["reports"])
            .with_results(3);
        assert!(input.had_results);
        assert_eq!(input.result_count, Some(3));
    }
}
