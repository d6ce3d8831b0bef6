// Builds chains of related queries out of the history log
//
// Like when someone searches "show documents", then "show pdf documents",
// then "show pdf documents from last week" - that's one exploratory
// session, and the refinement steps tell us how this user narrows things
// down.

use crate::db::QueryRecord;
use crate::scoring::Scorer;
use crate::context::{has_location_keyword, has_temporal_keyword};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Two queries more than this far apart never share a chain
pub const DEFAULT_CHAIN_TIME_THRESHOLD_SECS: i64 = 3600;

/// Similarity above this (plus a shared entity) makes a refinement
pub const DEFAULT_REFINEMENT_SIMILARITY: f64 = 0.7;

/// Weak-link floor: a pair below this with no shared entity closes the chain
const WEAK_LINK_SIMILARITY: f64 = 0.3;

/// Transitions at or above this similarity count as repetition
const REPETITION_SIMILARITY: f64 = 0.95;

/// How one query turned into the next within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementKind {
    ChangeEntity,
    TemporalRefinement,
    LocationRefinement,
    Narrow,
    Broaden,
    AddFilter,
}

impl std::fmt::Display for RefinementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefinementKind::ChangeEntity => "change_entity",
            RefinementKind::TemporalRefinement => "temporal_refinement",
            RefinementKind::LocationRefinement => "location_refinement",
            RefinementKind::Narrow => "narrow",
            RefinementKind::Broaden => "broaden",
            RefinementKind::AddFilter => "add_filter",
        };
        write!(f, "{}", s)
    }
}

/// Overall shape of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    Refinement,
    Expansion,
    Pivot,
    Exploration,
    Repetition,
    Comparison,
    DrillDown,
    Other,
}

/// Metadata for one step between consecutive chain members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTransition {
    pub gap_secs: i64,
    pub similarity: f64,
    pub shared_entities: Vec<String>,
    pub entities_added: Vec<String>,
    pub entities_removed: Vec<String>,
    /// Set only for refinement candidates (similarity above threshold
    /// and at least one shared entity)
    pub refinement: Option<RefinementKind>,
}

/// An ordered run of related historical queries.
///
/// Built once per analysis pass and immutable until the next pass
/// recomputes chains from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryChain {
    pub id: Uuid,
    pub query_ids: Vec<String>,
    pub query_texts: Vec<String>,
    pub chain_type: ChainType,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Entities present in every member query
    pub shared_entities: Vec<String>,
    pub transitions: Vec<ChainTransition>,
    /// Fraction of member queries that returned at least one result
    pub success_rate: f64,
}

impl QueryChain {
    pub fn len(&self) -> usize {
        self.query_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.query_ids.is_empty()
    }
}

/// Chain-building configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub time_threshold_secs: i64,
    pub refinement_similarity: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            time_threshold_secs: DEFAULT_CHAIN_TIME_THRESHOLD_SECS,
            refinement_similarity: DEFAULT_REFINEMENT_SIMILARITY,
        }
    }
}

/// Builds chains from a chronologically ordered history slice.
pub struct ChainBuilder {
    config: ChainConfig,
}

impl ChainBuilder {
    pub fn new(config: ChainConfig) -> Self {
        Self { config }
    }

    /// Build all chains. Chains of length 1 are discarded.
    pub fn build(&self, records: &[QueryRecord]) -> Vec<QueryChain> {
        let mut chains = Vec::new();
        if records.len() < 2 {
            return chains;
        }

        let mut members: Vec<usize> = vec![0];
        let mut transitions: Vec<ChainTransition> = Vec::new();

        for i in 1..records.len() {
            let prev = &records[i - 1];
            let curr = &records[i];
            let gap = (curr.timestamp - prev.timestamp).num_seconds();

            if gap > self.config.time_threshold_secs {
                self.close_chain(records, &members, &transitions, &mut chains);
                members = vec![i];
                transitions = Vec::new();
                continue;
            }

            let transition = self.classify_transition(prev, curr, gap);
            let keeps_chain = !transition.shared_entities.is_empty()
                || transition.similarity >= WEAK_LINK_SIMILARITY;

            if keeps_chain {
                members.push(i);
                transitions.push(transition);
            } else {
                self.close_chain(records, &members, &transitions, &mut chains);
                members = vec![i];
                transitions = Vec::new();
            }
        }

        self.close_chain(records, &members, &transitions, &mut chains);
        chains
    }

    /// Compute the transition metadata between two consecutive queries.
    fn classify_transition(
        &self,
        prev: &QueryRecord,
        curr: &QueryRecord,
        gap_secs: i64,
    ) -> ChainTransition {
        let similarity = Scorer::text_similarity(&prev.query_text, &curr.query_text);

        let prev_entities: BTreeSet<String> = prev.entities_lower().into_iter().collect();
        let curr_entities: BTreeSet<String> = curr.entities_lower().into_iter().collect();

        let shared: Vec<String> = prev_entities.intersection(&curr_entities).cloned().collect();
        let added: Vec<String> = curr_entities.difference(&prev_entities).cloned().collect();
        let removed: Vec<String> = prev_entities.difference(&curr_entities).cloned().collect();

        let refinement = if similarity > self.config.refinement_similarity && !shared.is_empty() {
            Some(self.classify_refinement(prev, curr, &added, &removed))
        } else {
            None
        };

        ChainTransition {
            gap_secs,
            similarity,
            shared_entities: shared,
            entities_added: added,
            entities_removed: removed,
            refinement,
        }
    }

    /// Ordered rule table, first match wins.
    fn classify_refinement(
        &self,
        prev: &QueryRecord,
        curr: &QueryRecord,
        added: &[String],
        removed: &[String],
    ) -> RefinementKind {
        // 1. An entity was swapped for another
        if !added.is_empty() && !removed.is_empty() {
            return RefinementKind::ChangeEntity;
        }

        // 2. A temporal keyword newly appears
        if has_temporal_keyword(&curr.query_text) && !has_temporal_keyword(&prev.query_text) {
            return RefinementKind::TemporalRefinement;
        }

        // 3. A location keyword newly appears
        if has_location_keyword(&curr.query_text) && !has_location_keyword(&prev.query_text) {
            return RefinementKind::LocationRefinement;
        }

        let longer = curr.query_text.len() > prev.query_text.len();
        let shorter = curr.query_text.len() < prev.query_text.len();

        // 4. Longer query, strictly more entities
        if longer && !added.is_empty() && removed.is_empty() {
            return RefinementKind::Narrow;
        }

        // 5. Shorter query, strictly fewer entities
        if shorter && added.is_empty() && !removed.is_empty() {
            return RefinementKind::Broaden;
        }

        RefinementKind::AddFilter
    }

    fn close_chain(
        &self,
        records: &[QueryRecord],
        members: &[usize],
        transitions: &[ChainTransition],
        chains: &mut Vec<QueryChain>,
    ) {
        // Chains of length 1 are noise
        if members.len() < 2 {
            return;
        }

        let first = &records[members[0]];
        let last = &records[*members.last().unwrap()];

        let mut shared: Option<BTreeSet<String>> = None;
        let mut successes = 0usize;
        for &idx in members {
            let record = &records[idx];
            if record.had_results {
                successes += 1;
            }
            let entities: BTreeSet<String> = record.entities_lower().into_iter().collect();
            shared = Some(match shared {
                None => entities,
                Some(acc) => acc.intersection(&entities).cloned().collect(),
            });
        }

        chains.push(QueryChain {
            id: Uuid::new_v4(),
            query_ids: members.iter().map(|&i| records[i].query_id.clone()).collect(),
            query_texts: members
                .iter()
                .map(|&i| records[i].query_text.clone())
                .collect(),
            chain_type: derive_chain_type(transitions),
            started_at: first.timestamp,
            ended_at: last.timestamp,
            shared_entities: shared.unwrap_or_default().into_iter().collect(),
            transitions: transitions.to_vec(),
            success_rate: successes as f64 / members.len() as f64,
        });
    }
}

/// A chain is what most of its transitions are.
fn derive_chain_type(transitions: &[ChainTransition]) -> ChainType {
    if transitions.is_empty() {
        return ChainType::Other;
    }

    let repetitions = transitions
        .iter()
        .filter(|t| t.similarity >= REPETITION_SIMILARITY)
        .count();
    if repetitions * 2 > transitions.len() {
        return ChainType::Repetition;
    }

    let mut narrow = 0;
    let mut broaden = 0;
    let mut change = 0;
    for t in transitions {
        match t.refinement {
            Some(RefinementKind::Narrow)
            | Some(RefinementKind::AddFilter)
            | Some(RefinementKind::TemporalRefinement)
            | Some(RefinementKind::LocationRefinement) => narrow += 1,
            Some(RefinementKind::Broaden) => broaden += 1,
            Some(RefinementKind::ChangeEntity) => change += 1,
            None => {}
        }
    }

    let max = narrow.max(broaden).max(change);
    if max == 0 {
        ChainType::Other
    } else if max == narrow {
        ChainType::Refinement
    } else if max == broaden {
        ChainType::Expansion
    } else {
        ChainType::Pivot
    }
}
