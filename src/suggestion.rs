/// Core suggestion and feedback data model
///
/// A `Suggestion` is the immutable value every provider produces: a proposed
/// follow-up query, a human-readable rationale, a clamped confidence score
/// and enough provenance (`source`, `source_context`, `relevance_factors`)
/// to route feedback back to whatever produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Which provider (or manual path) produced a suggestion.
///
/// Immutable after creation: the engine uses it to route feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    History,
    Activity,
    Entity,
    Temporal,
    Manual,
    System,
}

impl std::fmt::Display for SuggestionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SuggestionSource::History => "history",
            SuggestionSource::Activity => "activity",
            SuggestionSource::Entity => "entity",
            SuggestionSource::Temporal => "temporal",
            SuggestionSource::Manual => "manual",
            SuggestionSource::System => "system",
        };
        write!(f, "{}", s)
    }
}

impl SuggestionSource {
    /// All sources a provider can be registered under.
    pub const PROVIDER_SOURCES: [SuggestionSource; 4] = [
        SuggestionSource::History,
        SuggestionSource::Activity,
        SuggestionSource::Entity,
        SuggestionSource::Temporal,
    ];
}

/// A candidate follow-up query with confidence and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    /// The proposed query string
    pub text: String,
    /// Human-readable explanation of why this was suggested
    pub rationale: String,
    /// Always within [0, 1]
    pub confidence: f64,
    pub source: SuggestionSource,
    /// Opaque key-value map the originating provider needs to process
    /// feedback later (e.g. which template or pattern produced it)
    pub source_context: HashMap<String, String>,
    /// Named sub-scores that went into `confidence`, kept for
    /// explainability and tests
    pub relevance_factors: HashMap<String, f64>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Suggestion {
    /// Create a suggestion with confidence clamped to [0, 1].
    pub fn new(
        text: impl Into<String>,
        rationale: impl Into<String>,
        confidence: f64,
        source: SuggestionSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            rationale: rationale.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            source_context: HashMap::new(),
            relevance_factors: HashMap::new(),
            tags: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a source-context entry (builder style).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source_context.insert(key.into(), value.into());
        self
    }

    /// Attach a named relevance factor (builder style).
    pub fn with_factor(mut self, name: impl Into<String>, value: f64) -> Self {
        self.relevance_factors
            .insert(name.into(), value.clamp(0.0, 1.0));
        self
    }

    /// Attach a tag (builder style).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Re-scale confidence (used by the engine when applying source
    /// weights), keeping it clamped.
    pub fn scale_confidence(&mut self, factor: f64) {
        self.confidence = (self.confidence * factor).clamp(0.0, 1.0);
    }
}

/// What the user (or the calling system) thought of a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Accepted,
    Rejected,
    Neutral,
    Helpful,
    NotHelpful,
    Irrelevant,
}

impl FeedbackType {
    /// Positive feedback counts toward acceptance rates and provider
    /// success counters.
    pub fn is_positive(&self) -> bool {
        matches!(self, FeedbackType::Accepted | FeedbackType::Helpful)
    }

    /// Negative feedback counts toward provider failure counters.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            FeedbackType::Rejected | FeedbackType::NotHelpful | FeedbackType::Irrelevant
        )
    }
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeedbackType::Accepted => "accepted",
            FeedbackType::Rejected => "rejected",
            FeedbackType::Neutral => "neutral",
            FeedbackType::Helpful => "helpful",
            FeedbackType::NotHelpful => "not_helpful",
            FeedbackType::Irrelevant => "irrelevant",
        };
        write!(f, "{}", s)
    }
}

/// A recorded feedback event for one suggestion.
///
/// The engine keeps at most one per suggestion id; a second submission
/// replaces the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub suggestion_id: Uuid,
    pub feedback_type: FeedbackType,
    /// How many results the accepted query returned, when known
    pub result_count: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl Feedback {
    pub fn new(
        suggestion_id: Uuid,
        feedback_type: FeedbackType,
        result_count: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            suggestion_id,
            feedback_type,
            result_count,
            timestamp: Utc::now(),
        }
    }
}
