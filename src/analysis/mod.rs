/// Query chain & pattern analysis
///
/// One analysis pass loads history, builds chains, detects patterns and
/// computes aggregate metrics. The pass results feed the history and
/// temporal providers.

pub mod chains;
pub mod metrics;
pub mod patterns;
pub mod usage;

pub use chains::{
    ChainBuilder, ChainConfig, ChainTransition, ChainType, QueryChain, RefinementKind,
};
pub use metrics::UsageMetrics;
pub use patterns::{
    DetectedPattern, PatternDetector, PatternKind, TemporalPattern, TimeWindow,
    DEFAULT_MIN_PATTERN_SUPPORT,
};
pub use usage::{EntityUsage, UsageTracker};

use crate::db::{Database, QueryRecord};
use crate::error::Result;
use crate::suggestion::{Suggestion, SuggestionSource};
use tracing::debug;

/// Seed suggestions taken from the top patterns of a pass
const MAX_SEED_SUGGESTIONS: usize = 5;

/// Analyzer configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// History cap for `run()`
    pub max_items: i64,
    /// How far back `run()` looks
    pub days_back: i64,
    pub chain: ChainConfig,
    pub min_pattern_support: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            days_back: 90,
            chain: ChainConfig::default(),
            min_pattern_support: DEFAULT_MIN_PATTERN_SUPPORT,
        }
    }
}

/// Summary of one full analysis pass.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub queries_loaded: usize,
    pub chains_found: usize,
    pub patterns_found: usize,
    pub metrics: UsageMetrics,
    /// Seed suggestions derived from the strongest patterns
    pub suggestions: Vec<Suggestion>,
}

/// Runs analysis passes against the history log.
pub struct QueryAnalyzer {
    db: Database,
    config: AnalyzerConfig,
    records: Vec<QueryRecord>,
    usage: UsageTracker,
    chains: Vec<QueryChain>,
    patterns: Vec<DetectedPattern>,
}

impl QueryAnalyzer {
    pub fn new(db: Database) -> Self {
        Self::with_config(db, AnalyzerConfig::default())
    }

    pub fn with_config(db: Database, config: AnalyzerConfig) -> Self {
        Self {
            db,
            config,
            records: Vec::new(),
            usage: UsageTracker::new(),
            chains: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// Load history into the pass, replacing any previous load.
    ///
    /// Entity usage is folded in incrementally as each record streams
    /// through; chains and patterns from a previous pass are dropped.
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of records loaded
    pub async fn load_history(&mut self, max_items: i64, days_back: i64) -> Result<usize> {
        let records = self.db.load_history(max_items, days_back).await?;

        self.usage = UsageTracker::new();
        for record in &records {
            self.usage.observe(record);
        }

        self.chains.clear();
        self.patterns.clear();
        self.records = records;

        debug!(loaded = self.records.len(), "history pass loaded");
        Ok(self.records.len())
    }

    /// Build chains from the loaded history.
    pub fn analyze_chains(&mut self) -> Vec<QueryChain> {
        let builder = ChainBuilder::new(self.config.chain.clone());
        self.chains = builder.build(&self.records);
        debug!(chains = self.chains.len(), "chains built");
        self.chains.clone()
    }

    /// Detect recurring patterns across the loaded history and chains.
    pub fn detect_patterns(&mut self) -> Vec<DetectedPattern> {
        let detector = PatternDetector::new(self.config.min_pattern_support);
        self.patterns = detector.detect(&self.records, &self.usage, &self.chains);
        debug!(patterns = self.patterns.len(), "patterns detected");
        self.patterns.clone()
    }

    /// Aggregate metrics for the loaded history.
    pub fn compute_metrics(&self) -> UsageMetrics {
        UsageMetrics::compute(&self.records, &self.chains, &self.usage)
    }

    /// Full pass: load, chain, detect, measure.
    pub async fn run(&mut self) -> Result<AnalysisReport> {
        let loaded = self
            .load_history(self.config.max_items, self.config.days_back)
            .await?;
        self.analyze_chains();
        self.detect_patterns();
        let metrics = self.compute_metrics();

        let suggestions = self.seed_suggestions();

        Ok(AnalysisReport {
            queries_loaded: loaded,
            chains_found: self.chains.len(),
            patterns_found: self.patterns.len(),
            metrics,
            suggestions,
        })
    }

    /// Turn the strongest patterns with a usable template into seed
    /// suggestions.
    fn seed_suggestions(&self) -> Vec<Suggestion> {
        let mut ranked: Vec<&DetectedPattern> = self
            .patterns
            .iter()
            .filter(|p| !p.query_template.is_empty())
            .collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        ranked
            .into_iter()
            .take(MAX_SEED_SUGGESTIONS)
            .map(|p| {
                Suggestion::new(
                    p.query_template.clone(),
                    p.description.clone(),
                    p.confidence,
                    SuggestionSource::System,
                )
                .with_context("pattern_id", p.id.to_string())
                .with_tag(p.kind.to_string())
            })
            .collect()
    }

    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn chains(&self) -> &[QueryChain] {
        &self.chains
    }

    pub fn patterns(&self) -> &[DetectedPattern] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QueryInput;
    use chrono::{Datelike, Duration, Utc};

    async fn seeded_db() -> Database {
        let db = Database::new_test().await.unwrap();
        let base = Utc::now() - Duration::days(21);

        // Three weekly repeats of the same narrowing session
        for week in 0..3 {
            let start = base + Duration::weeks(week);
            db.record_query(
                QueryInput::new("show documents")
                    .with_entities(&["documents"])
                    .with_results(8)
                    .at(start),
            )
            .await
            .unwrap();
            db.record_query(
                QueryInput::new("show PDF documents")
                    .with_entities(&["documents", "PDF"])
                    .with_results(3)
                    .at(start + Duration::minutes(5)),
            )
            .await
            .unwrap();
        }

        db
    }

    #[tokio::test]
    async fn test_full_pass() {
        let db = seeded_db().await;
        let mut analyzer = QueryAnalyzer::new(db);

        let report = analyzer.run().await.unwrap();
        assert_eq!(report.queries_loaded, 6);
        assert_eq!(report.chains_found, 3);
        assert!(report.patterns_found > 0);
        assert_eq!(report.metrics.total_queries, 6);
        assert_eq!(report.metrics.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_load_resets_previous_pass() {
        let db = seeded_db().await;
        let mut analyzer = QueryAnalyzer::new(db);

        analyzer.load_history(1000, 90).await.unwrap();
        analyzer.analyze_chains();
        assert!(!analyzer.chains().is_empty());

        // Reload drops derived state until recomputed
        analyzer.load_history(1000, 90).await.unwrap();
        assert!(analyzer.chains().is_empty());
    }

    #[tokio::test]
    async fn test_seed_suggestions_carry_pattern_context() {
        let db = Database::new_test().await.unwrap();
        // Same Monday-morning query four weeks running, anchored to the
        // most recent Monday so the history window always covers it
        let now = Utc::now();
        let monday = (now - Duration::days(now.weekday().num_days_from_monday() as i64))
            .date_naive()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            .and_utc();
        for week in 0..4 {
            db.record_query(
                QueryInput::new("find python docs")
                    .with_entities(&["python", "docs"])
                    .with_results(12)
                    .at(monday - Duration::weeks(week)),
            )
            .await
            .unwrap();
        }

        let mut analyzer = QueryAnalyzer::with_config(
            db,
            AnalyzerConfig {
                days_back: 60,
                ..Default::default()
            },
        );
        let report = analyzer.run().await.unwrap();

        assert!(!report.suggestions.is_empty());
        let seed = &report.suggestions[0];
        assert_eq!(seed.source, SuggestionSource::System);
        assert!(seed.source_context.contains_key("pattern_id"));
        assert!(seed.confidence > 0.0 && seed.confidence <= 1.0);
    }
}
