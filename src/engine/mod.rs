/// Recommendation engine
///
/// Fans a request out to every registered provider concurrently, applies
/// per-source weights, ranks with a diversity cap, and routes feedback back
/// to whichever provider produced the suggestion. One misbehaving provider
/// (error, panic, missed deadline) only costs its own contribution.

pub mod settings;

pub use settings::EngineSettings;

use crate::context::{ActivityFeed, QueryContext};
use crate::db::Database;
use crate::error::{Result, SuggestError};
use crate::graph::EntityGraph;
use crate::providers::{
    ActivityContextProvider, EntityRelationshipProvider, HistoryChainProvider,
    SuggestionProvider, TemporalPatternProvider,
};
use crate::suggestion::{Feedback, FeedbackType, Suggestion, SuggestionSource};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Recently issued suggestions kept around for feedback routing
const CACHE_CAP: usize = 256;

const STATE_KEY: &str = "engine_state";

/// Per-source issued/accepted counters behind acceptance rates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceCounters {
    pub suggested: u64,
    pub accepted: u64,
}

/// Serializable snapshot of everything the engine has learned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub settings: EngineSettings,
    pub counters: HashMap<SuggestionSource, SourceCounters>,
    pub feedback: HashMap<Uuid, Feedback>,
}

#[derive(Default)]
struct SuggestionCache {
    by_id: HashMap<Uuid, Suggestion>,
    order: VecDeque<Uuid>,
}

impl SuggestionCache {
    fn insert(&mut self, suggestion: Suggestion) {
        let id = suggestion.id;
        if self.by_id.insert(id, suggestion).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > CACHE_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.by_id.remove(&evicted);
            }
        }
    }

    fn get(&self, id: &Uuid) -> Option<Suggestion> {
        self.by_id.get(id).cloned()
    }
}

pub struct RecommendationEngine {
    providers: HashMap<SuggestionSource, Arc<dyn SuggestionProvider>>,
    settings: RwLock<EngineSettings>,
    cache: Mutex<SuggestionCache>,
    counters: Mutex<HashMap<SuggestionSource, SourceCounters>>,
    feedback: Mutex<HashMap<Uuid, Feedback>>,
    db: Option<Database>,
}

impl RecommendationEngine {
    /// Engine with no providers registered yet.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            providers: HashMap::new(),
            settings: RwLock::new(settings),
            cache: Mutex::new(SuggestionCache::default()),
            counters: Mutex::new(HashMap::new()),
            feedback: Mutex::new(HashMap::new()),
            db: None,
        })
    }

    /// Engine wired with the four standard providers.
    pub fn with_standard_providers(
        settings: EngineSettings,
        feed: Arc<dyn ActivityFeed>,
        graph: Arc<dyn EntityGraph>,
    ) -> Result<Self> {
        let mut engine = Self::new(settings)?;
        engine.register_provider(Arc::new(HistoryChainProvider::new()));
        engine.register_provider(Arc::new(TemporalPatternProvider::new()));
        engine.register_provider(Arc::new(ActivityContextProvider::new(feed)));
        engine.register_provider(Arc::new(EntityRelationshipProvider::new(graph)));
        Ok(engine)
    }

    /// Attach a database for suggestion/feedback history and state
    /// persistence.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Register (or replace) the provider for its source.
    pub fn register_provider(&mut self, provider: Arc<dyn SuggestionProvider>) {
        self.providers.insert(provider.source(), provider);
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn update_settings(&self, settings: EngineSettings) -> Result<()> {
        settings.validate()?;
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
        Ok(())
    }

    /// Generate ranked suggestions for the current context.
    ///
    /// `max_results` overrides `settings.max_suggestions` when given. Every
    /// provider runs concurrently under a deadline; a provider that errors,
    /// panics or times out contributes nothing.
    pub async fn get_recommendations(
        &self,
        current_query: Option<&str>,
        context: &QueryContext,
        max_results: Option<usize>,
    ) -> Result<Vec<Suggestion>> {
        let settings = self.settings();
        if !settings.enabled {
            return Ok(Vec::new());
        }
        let max = max_results.unwrap_or(settings.max_suggestions);
        if max == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch so ranking and the diversity cap have slack
        let fetch = max * 2;
        let deadline = Duration::from_millis(settings.provider_timeout_ms);
        let query: Option<String> = current_query.map(str::to_string);

        let mut tasks = Vec::new();
        for (source, provider) in &self.providers {
            let weight = settings.weight_for(*source);
            if weight <= 0.0 {
                debug!(source = %source, "source disabled by zero weight");
                continue;
            }
            let source = *source;
            let provider = Arc::clone(provider);
            let context = context.clone();
            let query = query.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = tokio::time::timeout(
                    deadline,
                    provider.generate_suggestions(query.as_deref(), &context, fetch),
                )
                .await;
                (source, weight, outcome)
            }));
        }

        let mut candidates = Vec::new();
        for joined in join_all(tasks).await {
            match joined {
                Err(e) => warn!(error = %e, "suggestion provider task aborted"),
                Ok((source, _, Err(_))) => {
                    warn!(source = %source, timeout_ms = settings.provider_timeout_ms,
                        "provider missed its deadline")
                }
                Ok((source, _, Ok(Err(e)))) => {
                    warn!(source = %source, error = %e, "provider failed")
                }
                Ok((source, weight, Ok(Ok(mut suggestions)))) => {
                    debug!(source = %source, count = suggestions.len(), "provider returned");
                    for suggestion in &mut suggestions {
                        suggestion.scale_confidence(weight);
                    }
                    candidates.extend(suggestions);
                }
            }
        }

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut taken: HashMap<SuggestionSource, usize> = HashMap::new();
        let mut selected = Vec::new();
        for suggestion in candidates {
            if selected.len() == max {
                break;
            }
            // Sorted descending, so everything from here on is below cutoff
            if suggestion.confidence < settings.min_confidence {
                break;
            }
            let cap = source_cap(settings.weight_for(suggestion.source));
            let used = taken.entry(suggestion.source).or_insert(0);
            if *used >= cap {
                continue;
            }
            *used += 1;
            selected.push(suggestion);
        }

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            for suggestion in &selected {
                cache.insert(suggestion.clone());
                counters.entry(suggestion.source).or_default().suggested += 1;
            }
        }

        if settings.store_history {
            if let Some(db) = &self.db {
                for suggestion in &selected {
                    if let Err(e) = db.append_suggestion(suggestion).await {
                        warn!(error = %e, "failed to persist suggestion");
                    }
                }
            }
        }

        Ok(selected)
    }

    /// Record feedback for a previously issued suggestion.
    ///
    /// Unknown ids are logged and ignored. A second submission for the same
    /// suggestion replaces the first, and the acceptance counters are
    /// adjusted so only the latest feedback counts.
    pub async fn record_feedback(
        &self,
        suggestion_id: Uuid,
        feedback_type: FeedbackType,
        result_count: Option<u32>,
    ) -> Result<()> {
        let cached = {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.get(&suggestion_id)
        };
        let Some(suggestion) = cached else {
            warn!(%suggestion_id, "feedback for unknown suggestion");
            return Ok(());
        };

        let feedback = Feedback::new(suggestion_id, feedback_type, result_count);
        {
            let mut recorded = self.feedback.lock().unwrap_or_else(|e| e.into_inner());
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            let entry = counters.entry(suggestion.source).or_default();

            if let Some(previous) = recorded.insert(suggestion_id, feedback.clone()) {
                if previous.feedback_type.is_positive() {
                    entry.accepted = entry.accepted.saturating_sub(1);
                }
            }
            if feedback_type.is_positive() {
                entry.accepted += 1;
            }
        }

        let settings = self.settings();
        if settings.store_history {
            if let Some(db) = &self.db {
                if let Err(e) = db.append_feedback(&feedback).await {
                    warn!(error = %e, "failed to persist feedback");
                }
            }
        }

        if settings.enable_learning {
            if let Some(provider) = self.providers.get(&suggestion.source) {
                provider
                    .update_from_feedback(&suggestion, feedback_type, result_count)
                    .await;
            }
        }

        Ok(())
    }

    /// Fraction of issued suggestions that currently stand accepted, for
    /// one source or across all of them. 0.0 before anything was issued.
    pub fn get_acceptance_rate(&self, source: Option<SuggestionSource>) -> f64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let (suggested, accepted) = match source {
            Some(source) => counters
                .get(&source)
                .map(|c| (c.suggested, c.accepted))
                .unwrap_or((0, 0)),
            None => counters
                .values()
                .fold((0, 0), |(s, a), c| (s + c.suggested, a + c.accepted)),
        };
        if suggested == 0 {
            0.0
        } else {
            accepted as f64 / suggested as f64
        }
    }

    pub fn snapshot(&self) -> EngineState {
        EngineState {
            settings: self.settings(),
            counters: self
                .counters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            feedback: self
                .feedback
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    pub fn restore(&self, state: EngineState) -> Result<()> {
        state.settings.validate()?;
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = state.settings;
        *self.counters.lock().unwrap_or_else(|e| e.into_inner()) = state.counters;
        *self.feedback.lock().unwrap_or_else(|e| e.into_inner()) = state.feedback;
        Ok(())
    }

    /// Persist the current snapshot to the attached database.
    pub async fn save_state(&self) -> Result<()> {
        let db = self.db.as_ref().ok_or_else(|| {
            SuggestError::Generic("no database attached to engine".to_string())
        })?;
        let json = serde_json::to_string(&self.snapshot())?;
        db.set_state(STATE_KEY, &json).await
    }

    /// Restore a previously saved snapshot. Returns false when none exists.
    pub async fn load_state(&self) -> Result<bool> {
        let db = self.db.as_ref().ok_or_else(|| {
            SuggestError::Generic("no database attached to engine".to_string())
        })?;
        match db.get_state(STATE_KEY).await? {
            Some(json) => {
                let state: EngineState = serde_json::from_str(&json)?;
                self.restore(state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Diversity cap: how many results one source may occupy in the final
/// ranking. Scales with the source's weight, never below one.
fn source_cap(weight: f64) -> usize {
    ((2.0 * weight).round() as usize).max(1)
}
