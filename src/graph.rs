/// Entity relationship graph collaborator
///
/// The engine never owns relationship data; it asks an external graph for
/// the entities related to one it already knows about. An in-memory
/// implementation ships for wiring and tests.

use crate::context::EntityCategory;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One edge out of the relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub name: String,
    pub category: EntityCategory,
    /// e.g. "shared_with", "created_by", "mentioned_in", "part_of"
    pub relationship_kind: String,
    pub confidence: f64,
}

impl RelatedEntity {
    pub fn new(
        name: impl Into<String>,
        category: EntityCategory,
        relationship_kind: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            relationship_kind: relationship_kind.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// External collaborator: entity relationship lookups.
#[async_trait]
pub trait EntityGraph: Send + Sync {
    /// Entities related to `entity`. Unknown entities yield an empty
    /// list, not an error.
    async fn related_entities(&self, entity: &str) -> Result<Vec<RelatedEntity>>;
}

/// In-memory graph keyed by lowercased entity name.
#[derive(Default)]
pub struct StaticEntityGraph {
    edges: HashMap<String, Vec<RelatedEntity>>,
}

impl StaticEntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: RelatedEntity) {
        self.edges
            .entry(from.into().to_lowercase())
            .or_default()
            .push(to);
    }
}

#[async_trait]
impl EntityGraph for StaticEntityGraph {
    async fn related_entities(&self, entity: &str) -> Result<Vec<RelatedEntity>> {
        Ok(self
            .edges
            .get(&entity.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}
