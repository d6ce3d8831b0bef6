/// Engine configuration
///
/// Settings are validated before the engine accepts them; a bad value is a
/// caller mistake, not something to silently clamp.

use crate::error::{Result, SuggestError};
use crate::suggestion::SuggestionSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default number of suggestions returned per request
pub const DEFAULT_MAX_SUGGESTIONS: usize = 5;

/// Suggestions below this confidence are never surfaced
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

/// How long a single provider may spend generating, in milliseconds
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Master switch; a disabled engine returns no suggestions
    pub enabled: bool,
    pub max_suggestions: usize,
    pub min_confidence: f64,
    /// Per-source confidence multiplier. Missing sources default to 1.0;
    /// a weight of 0.0 disables that source entirely.
    pub source_weights: HashMap<SuggestionSource, f64>,
    /// When false, feedback is recorded but never forwarded to providers
    pub enable_learning: bool,
    /// When true and a database is attached, suggestions and feedback are
    /// appended to it
    pub store_history: bool,
    pub provider_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let source_weights = SuggestionSource::PROVIDER_SOURCES
            .iter()
            .map(|s| (*s, 1.0))
            .collect();
        Self {
            enabled: true,
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            source_weights,
            enable_learning: true,
            store_history: true,
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_suggestions == 0 {
            return Err(SuggestError::InvalidSettings(
                "max_suggestions must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(SuggestError::InvalidSettings(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        for (source, weight) in &self.source_weights {
            if *weight < 0.0 || !weight.is_finite() {
                return Err(SuggestError::InvalidSettings(format!(
                    "weight for source '{}' must be a non-negative number, got {}",
                    source, weight
                )));
            }
        }
        if self.provider_timeout_ms == 0 {
            return Err(SuggestError::InvalidSettings(
                "provider_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Weight for a source; sources absent from the map count as 1.0.
    pub fn weight_for(&self, source: SuggestionSource) -> f64 {
        self.source_weights.get(&source).copied().unwrap_or(1.0)
    }

    pub fn with_source_weight(mut self, source: SuggestionSource, weight: f64) -> Self {
        self.source_weights.insert(source, weight);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.enabled);
        assert_eq!(settings.max_suggestions, 5);
        for source in SuggestionSource::PROVIDER_SOURCES {
            assert_eq!(settings.weight_for(source), 1.0);
        }
    }

    #[test]
    fn test_rejects_zero_max_suggestions() {
        let settings = EngineSettings {
            max_suggestions: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SuggestError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let settings = EngineSettings {
            min_confidence: 1.2,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = EngineSettings {
            min_confidence: -0.1,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_weight() {
        let settings =
            EngineSettings::default().with_source_weight(SuggestionSource::History, -0.5);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_weight_is_allowed() {
        let settings =
            EngineSettings::default().with_source_weight(SuggestionSource::History, 0.0);
        assert!(settings.validate().is_ok());
        assert_eq!(settings.weight_for(SuggestionSource::History), 0.0);
    }

    #[test]
    fn test_missing_source_defaults_to_full_weight() {
        let settings = EngineSettings {
            source_weights: HashMap::new(),
            ..Default::default()
        };
        assert_eq!(settings.weight_for(SuggestionSource::Temporal), 1.0);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let settings = EngineSettings {
            provider_timeout_ms: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
