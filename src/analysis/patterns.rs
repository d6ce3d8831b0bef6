// Recurring-pattern detection over the loaded history
//
// Three detectors: temporal-hour ("python queries cluster at Monday 9am"),
// entity co-occurrence ("budget almost always shows up with atlas") and
// refinement style ("this user narrows by adding filters").

use crate::analysis::chains::{ChainType, QueryChain, RefinementKind};
use crate::analysis::usage::UsageTracker;
use crate::db::QueryRecord;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// How many observations before something counts as a pattern
pub const DEFAULT_MIN_PATTERN_SUPPORT: usize = 3;

/// Confidence ceiling for detected patterns
const MAX_PATTERN_CONFIDENCE: f64 = 0.95;

/// Base confidence blended into co-occurrence patterns
const COOCCURRENCE_BASE_CONFIDENCE: f64 = 0.6;

/// Conditional probability floor for co-occurrence patterns
const COOCCURRENCE_MIN_PROBABILITY: f64 = 0.5;

/// What kind of regularity a detected pattern describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    TemporalHour,
    EntityCooccurrence,
    RefinementStyle,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PatternKind::TemporalHour => "temporal_hour",
            PatternKind::EntityCooccurrence => "entity_cooccurrence",
            PatternKind::RefinementStyle => "refinement_style",
        };
        write!(f, "{}", s)
    }
}

/// One detected regularity, the analyzer's output unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub id: Uuid,
    pub kind: PatternKind,
    pub description: String,
    /// A concrete query this pattern would suggest
    pub query_template: String,
    pub confidence: f64,
    pub observation_count: u32,
    pub entities_involved: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// When a temporal pattern applies. All constraints are optional; a
/// window with none set matches any time ("universal" pattern).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Weekday indices, Monday = 0
    pub weekdays: Option<BTreeSet<u8>>,
    /// Inclusive hour-of-day range
    pub hour_range: Option<(u8, u8)>,
    /// Closed date range
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// Months, January = 1
    pub months: Option<BTreeSet<u8>>,
}

impl TimeWindow {
    pub fn is_universal(&self) -> bool {
        self.weekdays.is_none()
            && self.hour_range.is_none()
            && self.date_range.is_none()
            && self.months.is_none()
    }

    /// Strict check: every present constraint must be satisfied.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        if let Some(weekdays) = &self.weekdays {
            if !weekdays.contains(&(at.weekday().num_days_from_monday() as u8)) {
                return false;
            }
        }
        if let Some((start, end)) = self.hour_range {
            let hour = at.hour() as u8;
            if hour < start || hour > end {
                return false;
            }
        }
        if let Some((start, end)) = self.date_range {
            let date = at.date_naive();
            if date < start || date > end {
                return false;
            }
        }
        if let Some(months) = &self.months {
            if !months.contains(&(at.month() as u8)) {
                return false;
            }
        }
        true
    }

    /// Continuous [0, 1] score instead of the strict check.
    ///
    /// Exact weekday/hour matches score 1.0; mismatches decay linearly
    /// with circular distance (days / 7, hours / 12 capped). Date-range
    /// and month constraints stay binary. A window with no constraints
    /// scores a neutral 0.5.
    pub fn match_score(&self, at: DateTime<Utc>) -> f64 {
        if self.is_universal() {
            return 0.5;
        }

        let mut scores: Vec<f64> = Vec::new();

        if let Some(weekdays) = &self.weekdays {
            let today = at.weekday().num_days_from_monday() as i64;
            let distance = weekdays
                .iter()
                .map(|&d| {
                    let diff = (today - d as i64).rem_euclid(7);
                    diff.min(7 - diff)
                })
                .min()
                .unwrap_or(0);
            scores.push(1.0 - distance as f64 / 7.0);
        }

        if let Some((start, end)) = self.hour_range {
            let hour = at.hour() as i64;
            let distance = if hour >= start as i64 && hour <= end as i64 {
                0
            } else {
                let to_start = (hour - start as i64).rem_euclid(24);
                let to_end = (end as i64 - hour).rem_euclid(24);
                to_start.min(24 - to_start).min(to_end.min(24 - to_end))
            };
            scores.push(1.0 - (distance as f64 / 12.0).min(1.0));
        }

        if let Some((start, end)) = self.date_range {
            let date = at.date_naive();
            scores.push(if date >= start && date <= end { 1.0 } else { 0.0 });
        }

        if let Some(months) = &self.months {
            scores.push(if months.contains(&(at.month() as u8)) {
                1.0
            } else {
                0.0
            });
        }

        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// A recurring time-bound query habit, owned by the temporal provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalPattern {
    pub id: Uuid,
    pub description: String,
    pub query_template: String,
    pub window: TimeWindow,
    pub confidence: f64,
    pub observation_count: u32,
    pub successful_uses: u32,
    pub unsuccessful_uses: u32,
    pub last_used: Option<DateTime<Utc>>,
    /// When the pattern last produced an accepted suggestion
    pub last_success: Option<DateTime<Utc>>,
}

impl TemporalPattern {
    pub fn new(
        description: impl Into<String>,
        query_template: impl Into<String>,
        window: TimeWindow,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            query_template: query_template.into(),
            window,
            confidence: confidence.clamp(0.0, 1.0),
            observation_count: 0,
            successful_uses: 0,
            unsuccessful_uses: 0,
            last_used: None,
            last_success: None,
        }
    }

    /// Convert a detected temporal-hour pattern into an owned pattern.
    /// Other pattern kinds have no time window and return None.
    pub fn from_detected(pattern: &DetectedPattern) -> Option<TemporalPattern> {
        if pattern.kind != PatternKind::TemporalHour {
            return None;
        }

        let hour: u8 = pattern.metadata.get("hour")?.parse().ok()?;
        let weekdays = pattern
            .metadata
            .get("weekday")
            .and_then(|w| w.parse::<u8>().ok())
            .map(|w| {
                let mut set = BTreeSet::new();
                set.insert(w);
                set
            });

        let window = TimeWindow {
            weekdays,
            hour_range: Some((hour, hour)),
            date_range: None,
            months: None,
        };

        let mut result = TemporalPattern::new(
            pattern.description.clone(),
            pattern.query_template.clone(),
            window,
            pattern.confidence,
        );
        result.id = pattern.id;
        result.observation_count = pattern.observation_count;
        Some(result)
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.window.is_active(at)
    }

    pub fn match_score(&self, at: DateTime<Utc>) -> f64 {
        self.window.match_score(at)
    }

    /// Historical success ratio, neutral 0.5 with no history.
    pub fn success_ratio(&self) -> f64 {
        crate::scoring::Scorer::success_ratio(self.successful_uses, self.unsuccessful_uses)
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.successful_uses += 1;
        self.last_used = Some(at);
        self.last_success = Some(at);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.unsuccessful_uses += 1;
        self.last_used = Some(at);
    }
}

/// Runs the three detectors over one analysis pass.
pub struct PatternDetector {
    min_support: usize,
}

impl PatternDetector {
    pub fn new(min_support: usize) -> Self {
        Self { min_support }
    }

    /// Find all patterns for the current pass.
    pub fn detect(
        &self,
        records: &[QueryRecord],
        usage: &UsageTracker,
        chains: &[QueryChain],
    ) -> Vec<DetectedPattern> {
        let mut patterns = Vec::new();
        patterns.extend(self.detect_temporal_hour(records));
        patterns.extend(self.detect_cooccurrence(usage));
        patterns.extend(self.detect_refinement_style(chains));
        patterns
    }

    /// Temporal-hour patterns: entities and intents that cluster inside
    /// one hour-of-day bucket.
    pub fn detect_temporal_hour(&self, records: &[QueryRecord]) -> Vec<DetectedPattern> {
        let mut buckets: HashMap<u8, Vec<&QueryRecord>> = HashMap::new();
        for record in records {
            buckets
                .entry(record.timestamp.hour() as u8)
                .or_default()
                .push(record);
        }

        let mut patterns = Vec::new();

        for (hour, bucket) in buckets {
            if bucket.len() < self.min_support {
                continue;
            }

            let mut entity_counts: HashMap<String, u32> = HashMap::new();
            let mut intent_counts: HashMap<String, u32> = HashMap::new();
            for record in &bucket {
                for entity in record.entities_lower() {
                    *entity_counts.entry(entity).or_insert(0) += 1;
                }
                if let Some(intent) = &record.intent {
                    *intent_counts.entry(intent.clone()).or_insert(0) += 1;
                }
            }

            for (entity, count) in entity_counts {
                if (count as usize) < self.min_support {
                    continue;
                }

                let observations: Vec<&&QueryRecord> = bucket
                    .iter()
                    .filter(|r| r.entities_lower().contains(&entity))
                    .collect();
                let template = observations
                    .last()
                    .map(|r| r.query_text.clone())
                    .unwrap_or_default();

                let mut metadata = HashMap::new();
                metadata.insert("hour".to_string(), hour.to_string());
                if let Some(weekday) = uniform_weekday(&observations) {
                    metadata.insert("weekday".to_string(), weekday.to_string());
                }

                patterns.push(DetectedPattern {
                    id: Uuid::new_v4(),
                    kind: PatternKind::TemporalHour,
                    description: format!(
                        "Queries about '{}' cluster around {:02}:00",
                        entity, hour
                    ),
                    query_template: template,
                    confidence: scaled_confidence(count),
                    observation_count: count,
                    entities_involved: vec![entity],
                    metadata,
                });
            }

            for (intent, count) in intent_counts {
                if (count as usize) < self.min_support {
                    continue;
                }

                let template = bucket
                    .iter()
                    .rev()
                    .find(|r| r.intent.as_deref() == Some(&intent))
                    .map(|r| r.query_text.clone())
                    .unwrap_or_default();

                let mut metadata = HashMap::new();
                metadata.insert("hour".to_string(), hour.to_string());
                metadata.insert("intent".to_string(), intent.clone());

                patterns.push(DetectedPattern {
                    id: Uuid::new_v4(),
                    kind: PatternKind::TemporalHour,
                    description: format!("'{}' queries cluster around {:02}:00", intent, hour),
                    query_template: template,
                    confidence: scaled_confidence(count),
                    observation_count: count,
                    entities_involved: Vec::new(),
                    metadata,
                });
            }
        }

        patterns
    }

    /// Co-occurrence patterns: P(co-entity | entity) at or above 0.5
    /// with enough raw support.
    pub fn detect_cooccurrence(&self, usage: &UsageTracker) -> Vec<DetectedPattern> {
        let mut patterns = Vec::new();

        for entity in usage.iter() {
            if (entity.mention_count as usize) < self.min_support {
                continue;
            }

            for (co_entity, &count) in &entity.co_occurrence {
                if (count as usize) < self.min_support {
                    continue;
                }
                let conditional = count as f64 / entity.mention_count as f64;
                if conditional < COOCCURRENCE_MIN_PROBABILITY {
                    continue;
                }

                let template = entity
                    .example_queries
                    .iter()
                    .find(|q| q.to_lowercase().contains(co_entity.as_str()))
                    .cloned()
                    .unwrap_or_else(|| format!("find {} {}", entity.name, co_entity));

                let confidence = (0.5 * COOCCURRENCE_BASE_CONFIDENCE + 0.5 * conditional)
                    .min(MAX_PATTERN_CONFIDENCE);

                let mut metadata = HashMap::new();
                metadata.insert("conditional_probability".to_string(), format!("{:.3}", conditional));

                patterns.push(DetectedPattern {
                    id: Uuid::new_v4(),
                    kind: PatternKind::EntityCooccurrence,
                    description: format!(
                        "'{}' usually appears together with '{}'",
                        entity.name, co_entity
                    ),
                    query_template: template,
                    confidence,
                    observation_count: count,
                    entities_involved: vec![entity.name.clone(), co_entity.clone()],
                    metadata,
                });
            }
        }

        patterns
    }

    /// Refinement-style patterns: subtypes that recur across refinement
    /// chains, weighted up when those chains succeed.
    pub fn detect_refinement_style(&self, chains: &[QueryChain]) -> Vec<DetectedPattern> {
        let mut subtype_counts: HashMap<RefinementKind, u32> = HashMap::new();
        let mut subtype_success: HashMap<RefinementKind, Vec<f64>> = HashMap::new();

        for chain in chains {
            if chain.chain_type != ChainType::Refinement {
                continue;
            }
            for transition in &chain.transitions {
                if let Some(kind) = transition.refinement {
                    *subtype_counts.entry(kind).or_insert(0) += 1;
                    subtype_success
                        .entry(kind)
                        .or_default()
                        .push(chain.success_rate);
                }
            }
        }

        let mut patterns = Vec::new();
        for (kind, count) in subtype_counts {
            if (count as usize) < self.min_support {
                continue;
            }

            let rates = &subtype_success[&kind];
            let avg_success = rates.iter().sum::<f64>() / rates.len() as f64;
            let confidence =
                (0.4 + 0.1 * count as f64 + 0.3 * avg_success).min(MAX_PATTERN_CONFIDENCE);

            let mut metadata = HashMap::new();
            metadata.insert("subtype".to_string(), kind.to_string());
            metadata.insert("avg_success_rate".to_string(), format!("{:.3}", avg_success));

            patterns.push(DetectedPattern {
                id: Uuid::new_v4(),
                kind: PatternKind::RefinementStyle,
                description: refinement_description(kind),
                query_template: String::new(),
                confidence,
                observation_count: count,
                entities_involved: Vec::new(),
                metadata,
            });
        }

        patterns
    }
}

/// Confidence grows with observations, capped well below certainty.
fn scaled_confidence(observations: u32) -> f64 {
    (0.5 + 0.1 * observations as f64).min(MAX_PATTERN_CONFIDENCE)
}

/// The shared weekday of a set of observations, if they all agree.
fn uniform_weekday(observations: &[&&QueryRecord]) -> Option<u8> {
    let mut weekdays = observations
        .iter()
        .map(|r| r.timestamp.weekday().num_days_from_monday() as u8);
    let first = weekdays.next()?;
    if weekdays.all(|w| w == first) {
        Some(first)
    } else {
        None
    }
}

fn refinement_description(kind: RefinementKind) -> String {
    match kind {
        RefinementKind::Narrow => "You often narrow queries by adding detail".to_string(),
        RefinementKind::Broaden => "You often broaden queries after empty results".to_string(),
        RefinementKind::ChangeEntity => "You often pivot between related subjects".to_string(),
        RefinementKind::TemporalRefinement => {
            "You often add a time filter to a repeated query".to_string()
        }
        RefinementKind::LocationRefinement => {
            "You often add a location filter to a repeated query".to_string()
        }
        RefinementKind::AddFilter => "You often add filters to a repeated query".to_string(),
    }
}
