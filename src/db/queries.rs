/// SQL query functions for the history log, the suggestion/feedback sink
/// and the engine-state table.

use crate::db::models::*;
use crate::db::Database;
use crate::error::Result;
use crate::suggestion::{Feedback, Suggestion};
use chrono::{Duration, Utc};
use uuid::Uuid;

impl Database {
    /// Record a query into the history log.
    ///
    /// # Returns
    /// * `Ok(String)` - The generated query id
    pub async fn record_query(&self, input: QueryInput) -> Result<String> {
        let query_id = Uuid::new_v4().to_string();
        let timestamp = input.timestamp.unwrap_or_else(Utc::now).to_rfc3339();
        let entities = serde_json::to_string(&input.entities)?;

        sqlx::query(
            r#"
            INSERT INTO query_history
                (query_id, query_text, timestamp, entities, intent,
                 had_results, execution_time_ms, result_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&query_id)
        .bind(&input.query_text)
        .bind(&timestamp)
        .bind(&entities)
        .bind(&input.intent)
        .bind(input.had_results)
        .bind(input.execution_time_ms)
        .bind(input.result_count)
        .execute(self.pool())
        .await?;

        Ok(query_id)
    }

    /// Load history in chronological order.
    ///
    /// # Arguments
    /// * `max_items` - Cap on the number of entries returned (newest win)
    /// * `days_back` - How far back to look
    pub async fn load_history(&self, max_items: i64, days_back: i64) -> Result<Vec<QueryRecord>> {
        let cutoff = (Utc::now() - Duration::days(days_back)).to_rfc3339();

        // Newest first to honor the cap, then reversed to chronological.
        // RFC 3339 strings sort correctly as text.
        let rows = sqlx::query_as::<_, QueryRow>(
            "SELECT * FROM query_history WHERE timestamp >= ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(&cutoff)
        .bind(max_items)
        .fetch_all(self.pool())
        .await?;

        let mut records: Vec<QueryRecord> = rows.into_iter().map(QueryRow::into_record).collect();
        records.reverse();
        Ok(records)
    }

    /// Append a surfaced suggestion to the sink.
    pub async fn append_suggestion(&self, suggestion: &Suggestion) -> Result<()> {
        let tags: Vec<&String> = suggestion.tags.iter().collect();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO suggestions
                (id, source, suggestion_text, rationale, confidence,
                 tags, source_context, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(suggestion.id.to_string())
        .bind(suggestion.source.to_string())
        .bind(&suggestion.text)
        .bind(&suggestion.rationale)
        .bind(suggestion.confidence)
        .bind(serde_json::to_string(&tags)?)
        .bind(serde_json::to_string(&suggestion.source_context)?)
        .bind(suggestion.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Append a feedback event to the sink.
    pub async fn append_feedback(&self, feedback: &Feedback) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback
                (id, suggestion_id, feedback_type, result_count, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(feedback.id.to_string())
        .bind(feedback.suggestion_id.to_string())
        .bind(feedback.feedback_type.to_string())
        .bind(feedback.result_count.map(|c| c as i64))
        .bind(feedback.timestamp.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Feedback events recorded for one suggestion, oldest first.
    pub async fn feedback_for(&self, suggestion_id: &Uuid) -> Result<Vec<FeedbackRow>> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            "SELECT * FROM feedback WHERE suggestion_id = ? ORDER BY created_at ASC",
        )
        .bind(suggestion_id.to_string())
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Read a persisted engine-state value.
    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM engine_state WHERE key = ?")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;

        Ok(row.map(|(v,)| v))
    }

    /// Write a persisted engine-state value (upsert).
    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO engine_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestion::{FeedbackType, SuggestionSource};

    #[tokio::test]
    async fn test_record_and_load_history_chronological() {
        let db = Database::new_test().await.unwrap();
        let base = Utc::now() - Duration::hours(3);

        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            db.record_query(
                QueryInput::new(*text)
                    .with_results(1)
                    .at(base + Duration::minutes(i as i64 * 10)),
            )
            .await
            .unwrap();
        }

        let history = db.load_history(100, 7).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].query_text, "first");
        assert_eq!(history[2].query_text, "third");
    }

    #[tokio::test]
    async fn test_load_history_respects_days_back() {
        let db = Database::new_test().await.unwrap();

        db.record_query(QueryInput::new("old").at(Utc::now() - Duration::days(30)))
            .await
            .unwrap();
        db.record_query(QueryInput::new("new"))
            .await
            .unwrap();

        let history = db.load_history(100, 7).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query_text, "new");
    }

    #[tokio::test]
    async fn test_load_history_cap_keeps_newest() {
        let db = Database::new_test().await.unwrap();
        let base = Utc::now() - Duration::hours(5);

        for i in 0..10 {
            db.record_query(
                QueryInput::new(format!("query {}", i)).at(base + Duration::minutes(i * 5)),
            )
            .await
            .unwrap();
        }

        let history = db.load_history(3, 7).await.unwrap();
        assert_eq!(history.len(), 3);
        // Newest three, still chronological
        assert_eq!(history[0].query_text, "query 7");
        assert_eq!(history[2].query_text, "query 9");
    }

    #[tokio::test]
    async fn test_suggestion_and_feedback_sink() {
        let db = Database::new_test().await.unwrap();

        let suggestion = Suggestion::new(
            "show recent docs",
            "test",
            0.7,
            SuggestionSource::History,
        )
        .with_tag("test");
        db.append_suggestion(&suggestion).await.unwrap();

        let feedback = Feedback::new(suggestion.id, FeedbackType::Accepted, Some(4));
        db.append_feedback(&feedback).await.unwrap();

        let rows = db.feedback_for(&suggestion.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feedback_type, "accepted");
        assert_eq!(rows[0].result_count, Some(4));
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let db = Database::new_test().await.unwrap();

        assert!(db.get_state("engine").await.unwrap().is_none());
        db.set_state("engine", "{\"a\":1}").await.unwrap();
        db.set_state("engine", "{\"a\":2}").await.unwrap();
        assert_eq!(db.get_state("engine").await.unwrap().unwrap(), "{\"a\":2}");
    }
}
