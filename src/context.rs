/// Request context and the activity-feed collaborator
///
/// A `QueryContext` carries whatever the caller already knows about the
/// current request: entities in play, an optional handle into the ambient
/// activity feed, and an optional reference-time override (used by the
/// temporal provider and by tests instead of the wall clock).

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse entity category used by the entity provider's template table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Person,
    Organization,
    Project,
    Topic,
    File,
    Location,
    Date,
    Other,
}

impl std::fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityCategory::Person => "person",
            EntityCategory::Organization => "organization",
            EntityCategory::Project => "project",
            EntityCategory::Topic => "topic",
            EntityCategory::File => "file",
            EntityCategory::Location => "location",
            EntityCategory::Date => "date",
            EntityCategory::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl EntityCategory {
    /// Parse the string form produced by `Display` (used when reading a
    /// category back out of a suggestion's `source_context`).
    pub fn parse(s: &str) -> EntityCategory {
        match s {
            "person" => EntityCategory::Person,
            "organization" => EntityCategory::Organization,
            "project" => EntityCategory::Project,
            "topic" => EntityCategory::Topic,
            "file" => EntityCategory::File,
            "location" => EntityCategory::Location,
            "date" => EntityCategory::Date,
            _ => EntityCategory::Other,
        }
    }
}

/// An entity known to the current request, with a confidence in the
/// extraction itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntity {
    pub name: String,
    pub category: EntityCategory,
    pub confidence: f64,
}

impl ContextEntity {
    pub fn new(name: impl Into<String>, category: EntityCategory, confidence: f64) -> Self {
        Self {
            name: name.into(),
            category,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Everything the caller knows about the current request.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub entities: Vec<ContextEntity>,
    /// Handle passed through to the activity feed collaborator
    pub activity_handle: Option<String>,
    /// Overrides "now" for temporal matching (tests, replays)
    pub reference_time: Option<DateTime<Utc>>,
    pub attributes: HashMap<String, String>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: ContextEntity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_activity_handle(mut self, handle: impl Into<String>) -> Self {
        self.activity_handle = Some(handle.into());
        self
    }

    pub fn with_reference_time(mut self, at: DateTime<Utc>) -> Self {
        self.reference_time = Some(at);
        self
    }

    pub fn reference_time_or_now(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    /// Case-insensitive check whether an entity name is already present.
    pub fn has_entity(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.entities.iter().any(|e| e.name.to_lowercase() == lower)
    }
}

// Keyword tables for the rule-based extractor and the refinement
// classifier. Deliberately small; this is keyword matching, not NLP.

pub static TEMPORAL_KEYWORDS: &[&str] = &[
    "today",
    "yesterday",
    "tomorrow",
    "this week",
    "last week",
    "this month",
    "last month",
    "this year",
    "last year",
    "recent",
    "latest",
];

pub static LOCATION_KEYWORDS: &[&str] = &["near", "office", "remote", "onsite"];

static FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[\w\-]+\.(pdf|docx?|xlsx?|pptx?|txt|md|csv|png|jpe?g|mp[34])\b").unwrap()
});

static PROJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bproject\s+([A-Za-z][\w\-]*)").unwrap());

static PERSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:from|with|by|to)\s+([A-Z][a-z]+)\b").unwrap());

static CAPITALIZED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z][a-z]{2,})\b").unwrap());

static ORG_SUFFIXES: &[&str] = &["inc", "corp", "ltd", "labs", "team", "gmbh"];

static MONTHS_AND_DAYS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday",
];

/// Whether a temporal keyword appears in the text.
pub fn has_temporal_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    TEMPORAL_KEYWORDS.iter().any(|k| lower.contains(k))
        || MONTHS_AND_DAYS.iter().any(|k| lower.contains(k))
}

/// Whether a location keyword appears in the text, word-boundary aware.
pub fn has_location_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| LOCATION_KEYWORDS.contains(&w))
}

/// Rule-based entity extraction from a raw query string.
///
/// Ordered rule table: file names, "project X", person names after
/// from/with/by/to, months and weekdays, organization suffixes, then
/// remaining capitalized words as topics. Duplicates (case-insensitive)
/// are kept once, first category wins.
pub fn extract_entities(text: &str) -> Vec<ContextEntity> {
    let mut found: Vec<ContextEntity> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    let mut push = |name: &str, category: EntityCategory, confidence: f64,
                    found: &mut Vec<ContextEntity>,
                    seen: &mut Vec<String>| {
        let lower = name.to_lowercase();
        if !seen.contains(&lower) {
            seen.push(lower);
            found.push(ContextEntity::new(name, category, confidence));
        }
    };

    for cap in FILE_RE.find_iter(text) {
        push(cap.as_str(), EntityCategory::File, 0.9, &mut found, &mut seen);
    }

    for cap in PROJECT_RE.captures_iter(text) {
        push(&cap[1], EntityCategory::Project, 0.85, &mut found, &mut seen);
    }

    for cap in PERSON_RE.captures_iter(text) {
        push(&cap[1], EntityCategory::Person, 0.8, &mut found, &mut seen);
    }

    let lower = text.to_lowercase();
    for day_or_month in MONTHS_AND_DAYS {
        if lower
            .split_whitespace()
            .any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *day_or_month)
        {
            push(day_or_month, EntityCategory::Date, 0.75, &mut found, &mut seen);
        }
    }

    for word in text.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        let word_lower = trimmed.to_lowercase();
        if ORG_SUFFIXES.iter().any(|s| word_lower.ends_with(s)) && trimmed.len() > 3 {
            push(trimmed, EntityCategory::Organization, 0.7, &mut found, &mut seen);
        }
    }

    for cap in CAPITALIZED_RE.captures_iter(text) {
        // Skip sentence-leading words to cut false positives
        if text.starts_with(&cap[1]) {
            continue;
        }
        push(&cap[1], EntityCategory::Topic, 0.6, &mut found, &mut seen);
    }

    found
}

/// What kind of ambient activity a feed record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    FileEdited,
    FileViewed,
    MessageReceived,
    MeetingHeld,
    MediaPlayed,
    Other,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityKind::FileEdited => "file_edited",
            ActivityKind::FileViewed => "file_viewed",
            ActivityKind::MessageReceived => "message_received",
            ActivityKind::MeetingHeld => "meeting_held",
            ActivityKind::MediaPlayed => "media_played",
            ActivityKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl ActivityKind {
    pub fn parse(s: &str) -> ActivityKind {
        match s {
            "file_edited" => ActivityKind::FileEdited,
            "file_viewed" => ActivityKind::FileViewed,
            "message_received" => ActivityKind::MessageReceived,
            "meeting_held" => ActivityKind::MeetingHeld,
            "media_played" => ActivityKind::MediaPlayed,
            _ => ActivityKind::Other,
        }
    }
}

/// One record from the ambient activity feed.
///
/// Attribute keys are free-form; providers must tolerate any subset being
/// absent. Conventional keys: "file_name", "file_path", "sender",
/// "subject", "meeting_title", "media_title", "artist".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub kind: ActivityKind,
    pub attributes: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(kind: ActivityKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            attributes: HashMap::new(),
            timestamp,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// External collaborator: the ambient activity feed.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    /// Recent activities for a handle (user/session id). An unknown
    /// handle yields an empty list, not an error.
    async fn recent_activities(&self, handle: &str) -> Result<Vec<ActivityRecord>>;
}

/// In-memory feed for wiring and tests.
#[derive(Default)]
pub struct StaticActivityFeed {
    activities: HashMap<String, Vec<ActivityRecord>>,
}

impl StaticActivityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: impl Into<String>, records: Vec<ActivityRecord>) {
        self.activities.insert(handle.into(), records);
    }
}

#[async_trait]
impl ActivityFeed for StaticActivityFeed {
    async fn recent_activities(&self, handle: &str) -> Result<Vec<ActivityRecord>> {
        Ok(self.activities.get(handle).cloned().unwrap_or_default())
    }
}
