// Activity context provider
//
// Turns what the user was just doing (files touched, messages received,
// meetings, media) into follow-up queries. Any attribute may be missing
// from a feed record; templates degrade to whatever is present.

use crate::context::{ActivityFeed, ActivityKind, ActivityRecord, QueryContext};
use crate::error::Result;
use crate::providers::{bonus_applies, SuggestionProvider, Tally};
use crate::suggestion::{FeedbackType, Suggestion, SuggestionSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Only this many of the newest activities are considered per request
const MAX_ACTIVITIES_CONSIDERED: usize = 10;

pub struct ActivityContextProvider {
    feed: Arc<dyn ActivityFeed>,
    learning: RwLock<HashMap<ActivityKind, Tally>>,
}

impl ActivityContextProvider {
    pub fn new(feed: Arc<dyn ActivityFeed>) -> Self {
        Self {
            feed,
            learning: RwLock::new(HashMap::new()),
        }
    }

    fn kind_ratio(&self, kind: ActivityKind) -> f64 {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map(Tally::ratio)
            .unwrap_or(0.5)
    }

    #[cfg(test)]
    fn kind_tally(&self, kind: ActivityKind) -> (u32, u32) {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map(|t| (t.successes, t.failures))
            .unwrap_or((0, 0))
    }

    /// Render one activity into (text, rationale, attribute coverage).
    /// None when the record carries nothing usable.
    fn render(activity: &ActivityRecord) -> Option<(String, String, f64)> {
        let attr = |key: &str| activity.attributes.get(key).map(String::as_str);

        match activity.kind {
            ActivityKind::FileEdited | ActivityKind::FileViewed => {
                let file = attr("file_name").or_else(|| attr("file_path"))?;
                Some((
                    format!("find documents related to {}", file),
                    format!("You recently worked on {}", file),
                    1.0,
                ))
            }
            ActivityKind::MessageReceived => match (attr("sender"), attr("subject")) {
                (Some(sender), Some(subject)) => Some((
                    format!("find the thread '{}' from {}", subject, sender),
                    format!("New message from {}", sender),
                    1.0,
                )),
                (Some(sender), None) => Some((
                    format!("show recent emails from {}", sender),
                    format!("New message from {}", sender),
                    0.5,
                )),
                (None, Some(subject)) => Some((
                    format!("find messages about {}", subject),
                    "You received a message about this".to_string(),
                    0.5,
                )),
                (None, None) => None,
            },
            ActivityKind::MeetingHeld => {
                let title = attr("meeting_title")?;
                Some((
                    format!("find notes from {}", title),
                    format!("You attended '{}'", title),
                    1.0,
                ))
            }
            ActivityKind::MediaPlayed => match (attr("artist"), attr("media_title")) {
                (Some(artist), _) => Some((
                    format!("play more from {}", artist),
                    format!("You recently listened to {}", artist),
                    1.0,
                )),
                (None, Some(title)) => Some((
                    format!("find media similar to {}", title),
                    format!("You recently played '{}'", title),
                    0.5,
                )),
                (None, None) => None,
            },
            ActivityKind::Other => None,
        }
    }
}

#[async_trait]
impl SuggestionProvider for ActivityContextProvider {
    fn source(&self) -> SuggestionSource {
        SuggestionSource::Activity
    }

    async fn generate_suggestions(
        &self,
        _current_query: Option<&str>,
        context: &QueryContext,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>> {
        let Some(handle) = &context.activity_handle else {
            return Ok(Vec::new());
        };

        let mut activities = match self.feed.recent_activities(handle).await {
            Ok(activities) => activities,
            Err(e) => {
                // Feed unavailable is a missing signal, not a failure
                warn!(handle = %handle, error = %e, "activity feed unavailable");
                return Ok(Vec::new());
            }
        };

        let now = context.reference_time_or_now();
        activities.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        activities.truncate(MAX_ACTIVITIES_CONSIDERED);

        let mut suggestions = Vec::new();
        for activity in &activities {
            let Some((text, rationale, coverage)) = Self::render(activity) else {
                continue;
            };

            let hours_ago = (now - activity.timestamp).num_minutes().max(0) as f64 / 60.0;
            let recency = (-hours_ago / 24.0).exp();

            let mut factors = HashMap::new();
            factors.insert("recency".to_string(), recency);
            factors.insert("attribute_coverage".to_string(), coverage);
            factors.insert("kind_history".to_string(), self.kind_ratio(activity.kind));
            let mut weights = HashMap::new();
            weights.insert("recency".to_string(), 0.4);
            weights.insert("attribute_coverage".to_string(), 0.3);
            weights.insert("kind_history".to_string(), 0.3);

            let confidence = self.calculate_confidence(&factors, Some(&weights));

            let mut suggestion = Suggestion::new(
                text,
                rationale,
                confidence,
                SuggestionSource::Activity,
            )
            .with_context("activity_kind", activity.kind.to_string())
            .with_tag(format!("activity:{}", activity.kind));
            for (name, value) in factors {
                suggestion = suggestion.with_factor(name, value);
            }
            suggestions.push(suggestion);
        }

        // Best confidence per rendered text wins
        suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut seen: Vec<String> = Vec::new();
        suggestions.retain(|s| {
            let key = s.text.to_lowercase();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });

        suggestions.truncate(max_suggestions);
        Ok(suggestions)
    }

    async fn update_from_feedback(
        &self,
        suggestion: &Suggestion,
        feedback: FeedbackType,
        result_count: Option<u32>,
    ) {
        let Some(kind) = suggestion.source_context.get("activity_kind") else {
            return;
        };
        if !feedback.is_positive() && !feedback.is_negative() {
            return;
        }

        let kind = ActivityKind::parse(kind);
        let mut learning = self.learning.write().unwrap_or_else(|e| e.into_inner());
        learning
            .entry(kind)
            .or_default()
            .record(feedback.is_positive(), bonus_applies(result_count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticActivityFeed;
    use crate::error::SuggestError;
    use chrono::{Duration, Utc};

    fn feed() -> StaticActivityFeed {
        let now = Utc::now();
        let mut feed = StaticActivityFeed::new();
        feed.insert(
            "me",
            vec![
                ActivityRecord::new(ActivityKind::FileEdited, now - Duration::minutes(20))
                    .with_attribute("file_name", "roadmap.pdf"),
                ActivityRecord::new(ActivityKind::MessageReceived, now - Duration::hours(2))
                    .with_attribute("sender", "Sarah")
                    .with_attribute("subject", "Q3 budget"),
                ActivityRecord::new(ActivityKind::MeetingHeld, now - Duration::hours(30))
                    .with_attribute("meeting_title", "planning sync"),
                // Nothing usable on this one
                ActivityRecord::new(ActivityKind::MessageReceived, now - Duration::hours(1)),
            ],
        );
        feed
    }

    fn context() -> QueryContext {
        QueryContext::new().with_activity_handle("me")
    }

    #[tokio::test]
    async fn test_generates_from_recent_activity() {
        let provider = ActivityContextProvider::new(Arc::new(feed()));
        let suggestions = provider.generate_suggestions(None, &context(), 10).await.unwrap();

        assert!(suggestions
            .iter()
            .any(|s| s.text == "find documents related to roadmap.pdf"));
        assert!(suggestions
            .iter()
            .any(|s| s.text == "find the thread 'Q3 budget' from Sarah"));
        assert!(suggestions
            .iter()
            .any(|s| s.text == "find notes from planning sync"));
    }

    #[tokio::test]
    async fn test_recent_beats_stale() {
        let provider = ActivityContextProvider::new(Arc::new(feed()));
        let suggestions = provider.generate_suggestions(None, &context(), 10).await.unwrap();

        let file_pos = suggestions
            .iter()
            .position(|s| s.text.contains("roadmap.pdf"))
            .unwrap();
        let meeting_pos = suggestions
            .iter()
            .position(|s| s.text.contains("planning sync"))
            .unwrap();
        assert!(file_pos < meeting_pos);
    }

    #[tokio::test]
    async fn test_no_handle_is_quiet() {
        let provider = ActivityContextProvider::new(Arc::new(feed()));
        let suggestions = provider
            .generate_suggestions(None, &QueryContext::new(), 10)
            .await
            .unwrap();
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handle_is_quiet() {
        let provider = ActivityContextProvider::new(Arc::new(feed()));
        let ctx = QueryContext::new().with_activity_handle("somebody else");
        let suggestions = provider.generate_suggestions(None, &ctx, 10).await.unwrap();
        assert!(suggestions.is_empty());
    }

    struct BrokenFeed;

    #[async_trait]
    impl ActivityFeed for BrokenFeed {
        async fn recent_activities(&self, _handle: &str) -> Result<Vec<ActivityRecord>> {
            Err(SuggestError::Generic("feed offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_broken_feed_is_quiet_not_fatal() {
        let provider = ActivityContextProvider::new(Arc::new(BrokenFeed));
        let suggestions = provider.generate_suggestions(None, &context(), 10).await.unwrap();
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_attribute_subsets_tolerated() {
        let now = Utc::now();
        let mut feed = StaticActivityFeed::new();
        feed.insert(
            "me",
            vec![ActivityRecord::new(
                ActivityKind::MessageReceived,
                now - Duration::minutes(5),
            )
            .with_attribute("sender", "Omar")],
        );

        let provider = ActivityContextProvider::new(Arc::new(feed));
        let suggestions = provider.generate_suggestions(None, &context(), 10).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].text, "show recent emails from Omar");
        // Partial attributes reduce the coverage factor
        assert_eq!(*suggestions[0].relevance_factors.get("attribute_coverage").unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_feedback_counters() {
        let provider = ActivityContextProvider::new(Arc::new(feed()));
        let suggestions = provider.generate_suggestions(None, &context(), 10).await.unwrap();
        let s = suggestions
            .iter()
            .find(|s| s.text.contains("roadmap.pdf"))
            .unwrap();

        provider
            .update_from_feedback(s, FeedbackType::Helpful, Some(2))
            .await;
        assert_eq!(provider.kind_tally(ActivityKind::FileEdited), (1, 0));

        provider
            .update_from_feedback(s, FeedbackType::Accepted, Some(20))
            .await;
        assert_eq!(provider.kind_tally(ActivityKind::FileEdited), (3, 0));

        provider
            .update_from_feedback(s, FeedbackType::Irrelevant, None)
            .await;
        assert_eq!(provider.kind_tally(ActivityKind::FileEdited), (3, 1));
    }

    #[tokio::test]
    async fn test_max_suggestions_respected() {
        let provider = ActivityContextProvider::new(Arc::new(feed()));
        let suggestions = provider.generate_suggestions(None, &context(), 1).await.unwrap();
        assert_eq!(suggestions.len(), 1);
    }
}
