// Entity relationship provider
//
// Renders query templates for the entities in play, then walks the
// relationship graph one hop and renders a couple of templates for
// related entities too. A per-template and per-category success history
// feeds back into the confidence blend.

use crate::context::{extract_entities, ContextEntity, EntityCategory, QueryContext};
use crate::error::Result;
use crate::graph::EntityGraph;
use crate::providers::{bonus_applies, SuggestionProvider, Tally};
use crate::suggestion::{FeedbackType, Suggestion, SuggestionSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Fixed strength assumed for any graph relationship
const RELATIONSHIP_STRENGTH: f64 = 0.6;

/// At most this many templates rendered per related entity
const MAX_RELATED_TEMPLATES: usize = 2;

/// Per-category cap once every category got its top slot
const MAX_PER_CATEGORY: usize = 3;

/// Templates and feedback-relevant relationship kinds for one category.
struct CategoryProfile {
    templates: &'static [&'static str],
    base_confidence: f64,
    relevant_kinds: &'static [&'static str],
}

fn profile(category: EntityCategory) -> &'static CategoryProfile {
    match category {
        EntityCategory::Person => &CategoryProfile {
            templates: &[
                "documents shared with {name}",
                "recent emails from {name}",
                "meetings with {name}",
            ],
            base_confidence: 0.7,
            relevant_kinds: &["shared_with", "created_by", "mentioned_in"],
        },
        EntityCategory::Organization => &CategoryProfile {
            templates: &["documents about {name}", "recent messages mentioning {name}"],
            base_confidence: 0.6,
            relevant_kinds: &["part_of", "mentioned_in"],
        },
        EntityCategory::Project => &CategoryProfile {
            templates: &[
                "recent updates on {name}",
                "documents for {name}",
                "open tasks in {name}",
            ],
            base_confidence: 0.7,
            relevant_kinds: &["part_of", "created_by", "mentioned_in"],
        },
        EntityCategory::Topic => &CategoryProfile {
            templates: &["recent documents about {name}", "more about {name}"],
            base_confidence: 0.55,
            relevant_kinds: &["mentioned_in", "related_to"],
        },
        EntityCategory::File => &CategoryProfile {
            templates: &["documents similar to {name}", "who edited {name}"],
            base_confidence: 0.65,
            relevant_kinds: &["created_by", "shared_with"],
        },
        EntityCategory::Location => &CategoryProfile {
            templates: &["events near {name}", "photos taken in {name}"],
            base_confidence: 0.5,
            relevant_kinds: &["located_in"],
        },
        EntityCategory::Date => &CategoryProfile {
            templates: &["what happened on {name}", "meetings on {name}"],
            base_confidence: 0.5,
            relevant_kinds: &["occurred_on"],
        },
        EntityCategory::Other => &CategoryProfile {
            templates: &["search for {name}"],
            base_confidence: 0.45,
            relevant_kinds: &["related_to", "mentioned_in"],
        },
    }
}

#[derive(Default)]
struct TemplateLearning {
    by_template: HashMap<String, Tally>,
    by_category: HashMap<EntityCategory, Tally>,
}

pub struct EntityRelationshipProvider {
    graph: Arc<dyn EntityGraph>,
    learning: RwLock<TemplateLearning>,
}

impl EntityRelationshipProvider {
    pub fn new(graph: Arc<dyn EntityGraph>) -> Self {
        Self {
            graph,
            learning: RwLock::new(TemplateLearning::default()),
        }
    }

    fn template_ratio(&self, template: &str) -> f64 {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_template
            .get(template)
            .map(Tally::ratio)
            .unwrap_or(0.5)
    }

    fn category_ratio(&self, category: EntityCategory) -> f64 {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_category
            .get(&category)
            .map(Tally::ratio)
            .unwrap_or(0.5)
    }

    #[cfg(test)]
    fn template_tally(&self, template: &str) -> (u32, u32) {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_template
            .get(template)
            .map(|t| (t.successes, t.failures))
            .unwrap_or((0, 0))
    }

    #[cfg(test)]
    fn category_tally(&self, category: EntityCategory) -> (u32, u32) {
        self.learning
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_category
            .get(&category)
            .map(|t| (t.successes, t.failures))
            .unwrap_or((0, 0))
    }

    /// Render every template of the entity's own category.
    fn direct_suggestions(&self, entity: &ContextEntity) -> Vec<Suggestion> {
        let profile = profile(entity.category);
        let mut suggestions = Vec::new();

        for template in profile.templates {
            let text = template.replace("{name}", &entity.name);

            let mut factors = HashMap::new();
            factors.insert("category_base".to_string(), profile.base_confidence);
            factors.insert("entity_confidence".to_string(), entity.confidence);
            factors.insert("template_history".to_string(), self.template_ratio(template));
            factors.insert(
                "category_history".to_string(),
                self.category_ratio(entity.category),
            );
            let mut weights = HashMap::new();
            weights.insert("category_base".to_string(), 0.3);
            weights.insert("entity_confidence".to_string(), 0.3);
            weights.insert("template_history".to_string(), 0.2);
            weights.insert("category_history".to_string(), 0.2);

            let confidence = self.calculate_confidence(&factors, Some(&weights));

            let mut suggestion = Suggestion::new(
                text,
                format!("Based on '{}' in your query", entity.name),
                confidence,
                SuggestionSource::Entity,
            )
            .with_context("template", template.to_string())
            .with_context("entity_type", entity.category.to_string())
            .with_tag(format!("entity:{}", entity.name.to_lowercase()));
            for (name, value) in factors {
                suggestion = suggestion.with_factor(name, value);
            }
            suggestions.push(suggestion);
        }

        suggestions
    }

    /// One hop through the graph: render up to two templates from each
    /// related entity's own category.
    async fn related_suggestions(
        &self,
        entity: &ContextEntity,
        context: &QueryContext,
        known: &[ContextEntity],
    ) -> Vec<Suggestion> {
        let related = match self.graph.related_entities(&entity.name).await {
            Ok(related) => related,
            Err(e) => {
                // Graph unavailable is a missing signal, not a failure
                warn!(entity = %entity.name, error = %e, "relationship graph lookup failed");
                return Vec::new();
            }
        };

        let relevant = profile(entity.category).relevant_kinds;
        let mut suggestions = Vec::new();

        for rel in related {
            if !relevant.contains(&rel.relationship_kind.as_str()) {
                continue;
            }
            if context.has_entity(&rel.name)
                || known
                    .iter()
                    .any(|e| e.name.to_lowercase() == rel.name.to_lowercase())
            {
                continue;
            }

            let rel_profile = profile(rel.category);
            for template in rel_profile.templates.iter().take(MAX_RELATED_TEMPLATES) {
                let text = template.replace("{name}", &rel.name);

                let mut factors = HashMap::new();
                factors.insert("related_confidence".to_string(), rel.confidence);
                factors.insert("relationship_strength".to_string(), RELATIONSHIP_STRENGTH);
                factors.insert("source_confidence".to_string(), entity.confidence);
                let mut weights = HashMap::new();
                weights.insert("related_confidence".to_string(), 0.4);
                weights.insert("relationship_strength".to_string(), 0.4);
                weights.insert("source_confidence".to_string(), 0.2);

                let confidence = self.calculate_confidence(&factors, Some(&weights));

                let mut suggestion = Suggestion::new(
                    text,
                    format!(
                        "'{}' is {} '{}'",
                        rel.name,
                        rel.relationship_kind.replace('_', " "),
                        entity.name
                    ),
                    confidence,
                    SuggestionSource::Entity,
                )
                .with_context("template", template.to_string())
                .with_context("entity_type", rel.category.to_string())
                .with_tag(format!("related_to:{}", entity.name.to_lowercase()));
                for (name, value) in factors {
                    suggestion = suggestion.with_factor(name, value);
                }
                suggestions.push(suggestion);
            }
        }

        suggestions
    }
}

/// Cross-category diversity: the best of every category first, then the
/// rest by global confidence with a per-category cap.
fn diversify(mut candidates: Vec<Suggestion>, max_suggestions: usize) -> Vec<Suggestion> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let category_of = |s: &Suggestion| {
        s.source_context
            .get("entity_type")
            .cloned()
            .unwrap_or_default()
    };

    let mut picked: Vec<Suggestion> = Vec::new();
    let mut per_category: HashMap<String, usize> = HashMap::new();

    // Round one: best suggestion of each category
    let mut leftovers: Vec<Suggestion> = Vec::new();
    for candidate in candidates {
        let category = category_of(&candidate);
        if picked.len() < max_suggestions && !per_category.contains_key(&category) {
            per_category.insert(category, 1);
            picked.push(candidate);
        } else {
            leftovers.push(candidate);
        }
    }

    // Round two: fill by confidence, capped per category
    for candidate in leftovers {
        if picked.len() >= max_suggestions {
            break;
        }
        let category = category_of(&candidate);
        let count = per_category.entry(category).or_insert(0);
        if *count < MAX_PER_CATEGORY {
            *count += 1;
            picked.push(candidate);
        }
    }

    picked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    picked
}

#[async_trait]
impl SuggestionProvider for EntityRelationshipProvider {
    fn source(&self) -> SuggestionSource {
        SuggestionSource::Entity
    }

    async fn generate_suggestions(
        &self,
        current_query: Option<&str>,
        context: &QueryContext,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>> {
        // Entities from the query text plus whatever the caller already
        // knows, deduplicated case-insensitively
        let mut entities: Vec<ContextEntity> = context.entities.clone();
        if let Some(query) = current_query {
            for extracted in extract_entities(query) {
                if !entities
                    .iter()
                    .any(|e| e.name.to_lowercase() == extracted.name.to_lowercase())
                {
                    entities.push(extracted);
                }
            }
        }

        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for entity in &entities {
            candidates.extend(self.direct_suggestions(entity));
            candidates.extend(self.related_suggestions(entity, context, &entities).await);
        }

        // Best confidence per rendered text wins
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut seen: Vec<String> = Vec::new();
        candidates.retain(|s| {
            let key = s.text.to_lowercase();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });

        Ok(diversify(candidates, max_suggestions))
    }

    async fn update_from_feedback(
        &self,
        suggestion: &Suggestion,
        feedback: FeedbackType,
        result_count: Option<u32>,
    ) {
        if !feedback.is_positive() && !feedback.is_negative() {
            return;
        }

        let template = suggestion.source_context.get("template");
        let category = suggestion
            .source_context
            .get("entity_type")
            .map(|c| EntityCategory::parse(c));
        if template.is_none() && category.is_none() {
            return;
        }

        let bonus = bonus_applies(result_count);
        let mut learning = self.learning.write().unwrap_or_else(|e| e.into_inner());
        if let Some(template) = template {
            learning
                .by_template
                .entry(template.clone())
                .or_default()
                .record(feedback.is_positive(), bonus);
        }
        if let Some(category) = category {
            learning
                .by_category
                .entry(category)
                .or_default()
                .record(feedback.is_positive(), bonus);
        }
    }
}
