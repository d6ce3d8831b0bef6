// Temporal pattern provider
//
// Surfaces queries the user habitually runs around the current weekday
// and hour. Patterns come from a small seed set plus whatever the
// analyzer discovered; feedback tunes each pattern's success counters.

use crate::analysis::{DetectedPattern, TemporalPattern, TimeWindow};
use crate::context::QueryContext;
use crate::error::Result;
use crate::providers::{bonus_applies, SuggestionProvider};
use crate::scoring::Scorer;
use crate::suggestion::{FeedbackType, Suggestion, SuggestionSource};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Patterns scoring below this against the reference time stay hidden
const MIN_MATCH_SCORE: f64 = 0.5;

pub struct TemporalPatternProvider {
    patterns: RwLock<Vec<TemporalPattern>>,
}

impl TemporalPatternProvider {
    /// Provider with the default seed patterns.
    pub fn new() -> Self {
        Self {
            patterns: RwLock::new(seed_patterns()),
        }
    }

    /// Provider with an explicit pattern set (tests, restored state).
    pub fn with_patterns(patterns: Vec<TemporalPattern>) -> Self {
        Self {
            patterns: RwLock::new(patterns),
        }
    }

    /// Fold analyzer discoveries into the owned pattern set.
    ///
    /// Already-known patterns (same template and window hour) are kept
    /// with their learning counters intact.
    pub fn absorb_patterns(&self, detected: &[DetectedPattern]) {
        let mut patterns = self.patterns.write().unwrap_or_else(|e| e.into_inner());

        for candidate in detected.iter().filter_map(TemporalPattern::from_detected) {
            let known = patterns.iter_mut().find(|p| {
                p.query_template == candidate.query_template
                    && p.window.hour_range == candidate.window.hour_range
            });
            match known {
                Some(existing) => {
                    existing.observation_count = candidate.observation_count;
                    existing.confidence = candidate.confidence;
                }
                None => patterns.push(candidate),
            }
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    fn pattern(&self, id: &Uuid) -> Option<TemporalPattern> {
        self.patterns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.id == *id)
            .cloned()
    }
}

impl Default for TemporalPatternProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SuggestionProvider for TemporalPatternProvider {
    fn source(&self) -> SuggestionSource {
        SuggestionSource::Temporal
    }

    async fn generate_suggestions(
        &self,
        _current_query: Option<&str>,
        context: &QueryContext,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>> {
        let now = context.reference_time_or_now();

        let mut scored: Vec<(TemporalPattern, f64)> = {
            let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
            patterns
                .iter()
                .map(|p| (p.clone(), p.match_score(now)))
                .filter(|(_, score)| *score >= MIN_MATCH_SCORE)
                .collect()
        };

        scored.sort_by(|a, b| {
            (b.1 * b.0.confidence).total_cmp(&(a.1 * a.0.confidence))
        });

        let mut suggestions = Vec::new();
        for (pattern, match_score) in scored.into_iter().take(max_suggestions) {
            let timed = pattern.confidence * match_score;
            // Blend with how well this pattern has actually worked out
            let mut confidence = (timed + pattern.success_ratio()) / 2.0;
            if let Some(last_success) = pattern.last_success {
                let hours = (now - last_success).num_minutes() as f64 / 60.0;
                confidence += Scorer::recency_boost(hours);
            }
            let confidence = confidence.min(1.0);

            let weekday = now.format("%A").to_string().to_lowercase();
            let suggestion = Suggestion::new(
                pattern.query_template.clone(),
                pattern.description.clone(),
                confidence,
                SuggestionSource::Temporal,
            )
            .with_context("pattern_id", pattern.id.to_string())
            .with_factor("match_score", match_score)
            .with_factor("pattern_confidence", pattern.confidence)
            .with_factor("success_ratio", pattern.success_ratio())
            .with_tag(format!("weekday:{}", weekday))
            .with_tag(format!("hour:{}", chrono::Timelike::hour(&now)));

            suggestions.push(suggestion);
        }

        Ok(suggestions)
    }

    async fn update_from_feedback(
        &self,
        suggestion: &Suggestion,
        feedback: FeedbackType,
        result_count: Option<u32>,
    ) {
        let Some(raw_id) = suggestion.source_context.get("pattern_id") else {
            return;
        };
        let Ok(pattern_id) = raw_id.parse::<Uuid>() else {
            warn!(pattern_id = %raw_id, "unparseable pattern id in feedback");
            return;
        };

        let mut patterns = self.patterns.write().unwrap_or_else(|e| e.into_inner());
        let Some(pattern) = patterns.iter_mut().find(|p| p.id == pattern_id) else {
            warn!(%pattern_id, "feedback for unknown temporal pattern");
            return;
        };

        let now = Utc::now();
        if feedback.is_positive() {
            pattern.record_success(now);
            if bonus_applies(result_count) {
                pattern.successful_uses += 1;
            }
        } else if feedback.is_negative() {
            pattern.record_failure(now);
        }
    }
}

/// Fixed seed set: broadly useful habits to start from before the
/// analyzer has discovered anything user-specific.
fn seed_patterns() -> Vec<TemporalPattern> {
    let weekday = |d: u8| {
        let mut set = BTreeSet::new();
        set.insert(d);
        Some(set)
    };

    vec![
        TemporalPattern::new(
            "Monday mornings usually start with a catch-up",
            "show unread messages from last week",
            TimeWindow {
                weekdays: weekday(0),
                hour_range: Some((7, 10)),
                ..Default::default()
            },
            0.6,
        ),
        TemporalPattern::new(
            "Morning meeting check",
            "show today's meetings",
            TimeWindow {
                hour_range: Some((7, 9)),
                ..Default::default()
            },
            0.55,
        ),
        TemporalPattern::new(
            "Friday afternoon wrap-up",
            "summarize documents I worked on this week",
            TimeWindow {
                weekdays: weekday(4),
                hour_range: Some((14, 17)),
                ..Default::default()
            },
            0.6,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{PatternDetector, DEFAULT_MIN_PATTERN_SUPPORT};
    use crate::db::QueryRecord;
    use chrono::{DateTime, Duration, TimeZone};

    fn monday_nine(weeks_back: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 24, 9, 0, 0).unwrap() - Duration::weeks(weeks_back)
    }

    fn weekly_history() -> Vec<QueryRecord> {
        (0..4)
            .map(|w| QueryRecord {
                query_id: format!("q{}", w),
                timestamp: monday_nine(w),
                query_text: "find python docs".to_string(),
                entities: vec!["python".to_string(), "docs".to_string()],
                intent: Some("search".to_string()),
                had_results: true,
                execution_time_ms: None,
                result_count: Some(12),
            })
            .collect()
    }

    fn provider_with_discovered() -> TemporalPatternProvider {
        let detector = PatternDetector::new(DEFAULT_MIN_PATTERN_SUPPORT);
        let detected = detector.detect_temporal_hour(&weekly_history());
        let provider = TemporalPatternProvider::with_patterns(Vec::new());
        provider.absorb_patterns(&detected);
        provider
    }

    #[tokio::test]
    async fn test_weekly_habit_surfaces_next_monday() {
        let provider = provider_with_discovered();

        // 09:05 the following Monday
        let next_monday = monday_nine(0) + Duration::weeks(1) + Duration::minutes(5);
        let context = QueryContext::new().with_reference_time(next_monday);

        let suggestions = provider.generate_suggestions(None, &context, 5).await.unwrap();
        let python = suggestions
            .iter()
            .find(|s| s.text == "find python docs")
            .expect("expected the weekly python suggestion");
        assert!(python.confidence >= 0.5);
        assert!(python.confidence <= 1.0);
        assert!(python.tags.iter().any(|t| t.starts_with("weekday:")));
    }

    #[tokio::test]
    async fn test_mismatched_time_is_quiet() {
        let provider = provider_with_discovered();

        // Saturday 22:00: weekday score 1 - 2/7, hour score far off;
        // average drops below the surface threshold
        let saturday_night = monday_nine(0) + Duration::days(5) + Duration::hours(13);
        let context = QueryContext::new().with_reference_time(saturday_night);

        let suggestions = provider.generate_suggestions(None, &context, 5).await.unwrap();
        assert!(suggestions.iter().all(|s| s.text != "find python docs"));
    }

    #[tokio::test]
    async fn test_feedback_updates_counters_once() {
        let provider = provider_with_discovered();
        let context = QueryContext::new()
            .with_reference_time(monday_nine(0) + Duration::weeks(1));
        let suggestions = provider.generate_suggestions(None, &context, 5).await.unwrap();
        let suggestion = &suggestions[0];
        let pattern_id: Uuid = suggestion.source_context["pattern_id"].parse().unwrap();

        provider
            .update_from_feedback(suggestion, FeedbackType::Accepted, Some(3))
            .await;
        let pattern = provider.pattern(&pattern_id).unwrap();
        assert_eq!(pattern.successful_uses, 1);
        assert_eq!(pattern.unsuccessful_uses, 0);
    }

    #[tokio::test]
    async fn test_feedback_bonus_above_threshold() {
        let provider = provider_with_discovered();
        let context = QueryContext::new()
            .with_reference_time(monday_nine(0) + Duration::weeks(1));
        let suggestions = provider.generate_suggestions(None, &context, 5).await.unwrap();
        let suggestion = &suggestions[0];
        let pattern_id: Uuid = suggestion.source_context["pattern_id"].parse().unwrap();

        provider
            .update_from_feedback(suggestion, FeedbackType::Accepted, Some(6))
            .await;
        assert_eq!(provider.pattern(&pattern_id).unwrap().successful_uses, 2);

        provider
            .update_from_feedback(suggestion, FeedbackType::Rejected, Some(6))
            .await;
        let pattern = provider.pattern(&pattern_id).unwrap();
        assert_eq!(pattern.successful_uses, 2);
        assert_eq!(pattern.unsuccessful_uses, 1);
    }

    #[tokio::test]
    async fn test_feedback_without_pattern_id_is_noop() {
        let provider = provider_with_discovered();
        let stray = Suggestion::new("something", "no context", 0.5, SuggestionSource::Temporal);

        // Must not panic or touch any counters
        provider
            .update_from_feedback(&stray, FeedbackType::Accepted, None)
            .await;
    }

    #[tokio::test]
    async fn test_absorb_is_idempotent() {
        let detector = PatternDetector::new(DEFAULT_MIN_PATTERN_SUPPORT);
        let detected = detector.detect_temporal_hour(&weekly_history());

        let provider = TemporalPatternProvider::with_patterns(Vec::new());
        provider.absorb_patterns(&detected);
        let first = provider.pattern_count();
        provider.absorb_patterns(&detected);
        assert_eq!(provider.pattern_count(), first);
    }

    #[tokio::test]
    async fn test_seed_patterns_score_on_monday_morning() {
        let provider = TemporalPatternProvider::new();
        let context = QueryContext::new().with_reference_time(monday_nine(0));

        let suggestions = provider.generate_suggestions(None, &context, 5).await.unwrap();
        assert!(!suggestions.is_empty());
        for s in &suggestions {
            assert!(s.confidence >= 0.0 && s.confidence <= 1.0);
        }
    }
}
