//! In-process entity resolution: blocking keys, exact and fuzzy merging

use super::ner::EntitySpan;
use crate::config::ExtractionConfig;
use crate::types::{normalize_name, Entity};
use std::collections::HashMap;
use tracing::trace;
use uuid::Uuid;

/// Resolves entity spans to canonical entities within one document run.
///
/// Candidates are looked up by a blocking key of `(normalized-name prefix,
/// type)`; a candidate merges when its full normalized name matches or the
/// fuzzy ratio clears the configured threshold.
pub struct EntityResolver {
    fuzzy_threshold: f64,
    prefix_len: usize,
    blocks: HashMap<(String, String), Vec<Uuid>>,
    entities: HashMap<Uuid, Entity>,
}

impl EntityResolver {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            fuzzy_threshold: config.fuzzy_merge_threshold,
            prefix_len: config.blocking_prefix_len,
            blocks: HashMap::new(),
            entities: HashMap::new(),
        }
    }

    fn blocking_key(&self, normalized: &str, entity_type: &str) -> (String, String) {
        let prefix: String = normalized.chars().take(self.prefix_len).collect();
        (prefix, entity_type.to_string())
    }

    /// Resolve one span, merging into an existing entity or minting a fresh
    /// deterministic id. Returns the canonical id.
    pub fn resolve(&mut self, span: &EntitySpan, domain: &str) -> Uuid {
        let entity_type = span.entity_type.to_lowercase();
        let normalized = normalize_name(&span.text);
        let key = self.blocking_key(&normalized, &entity_type);

        if let Some(candidates) = self.blocks.get(&key) {
            for candidate_id in candidates {
                let Some(candidate) = self.entities.get(candidate_id) else {
                    continue;
                };
                let candidate_norm = normalize_name(&candidate.name);
                let matched = candidate_norm == normalized
                    || strsim::normalized_levenshtein(&candidate_norm, &normalized)
                        >= self.fuzzy_threshold;
                if matched {
                    let id = *candidate_id;
                    let observation = Entity::new(&span.text, &entity_type, domain, span.confidence);
                    if let Some(existing) = self.entities.get_mut(&id) {
                        existing.merge(&observation);
                    }
                    trace!("merged span '{}' into {}", span.text, id);
                    return id;
                }
            }
        }

        let entity = Entity::new(&span.text, &entity_type, domain, span.confidence);
        let id = entity.id;
        self.blocks.entry(key).or_default().push(id);
        self.entities.insert(id, entity);
        id
    }

    /// Look up the canonical id for a surface form, if already resolved
    pub fn lookup(&self, surface: &str, entity_type: &str) -> Option<Uuid> {
        let entity_type = entity_type.to_lowercase();
        let normalized = normalize_name(surface);
        let key = self.blocking_key(&normalized, &entity_type);
        self.blocks.get(&key).and_then(|candidates| {
            candidates
                .iter()
                .find(|id| {
                    self.entities.get(id).is_some_and(|e| {
                        let norm = normalize_name(&e.name);
                        norm == normalized
                            || e.aliases.iter().any(|a| normalize_name(a) == normalized)
                            || strsim::normalized_levenshtein(&norm, &normalized)
                                >= self.fuzzy_threshold
                    })
                })
                .copied()
        })
    }

    /// All resolved entities, sorted by id for deterministic output
    pub fn into_entities(self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.entities.into_values().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::entity_id;

    fn span(text: &str, entity_type: &str) -> EntitySpan {
        EntitySpan {
            text: text.to_string(),
            entity_type: entity_type.to_string(),
            confidence: 0.7,
            start: None,
        }
    }

    fn resolver() -> EntityResolver {
        EntityResolver::new(&ExtractionConfig::default())
    }

    #[test]
    fn test_exact_merge() {
        let mut r = resolver();
        let a = r.resolve(&span("Acme", "organization"), "general");
        let b = r.resolve(&span("acme", "organization"), "general");
        assert_eq!(a, b);

        let entities = r.into_entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].occurrence, 2);
    }

    #[test]
    fn test_fuzzy_merge() {
        let mut r = resolver();
        let a = r.resolve(&span("Acme Corporation", "organization"), "general");
        let b = r.resolve(&span("Acme Corporations", "organization"), "general");
        assert_eq!(a, b);
    }

    #[test]
    fn test_type_separates() {
        let mut r = resolver();
        let a = r.resolve(&span("Mercury", "planet"), "general");
        let b = r.resolve(&span("Mercury", "element"), "general");
        assert_ne!(a, b);
        assert_eq!(r.into_entities().len(), 2);
    }

    #[test]
    fn test_distinct_names_stay_apart() {
        let mut r = resolver();
        let a = r.resolve(&span("Paris", "location"), "general");
        let b = r.resolve(&span("Berlin", "location"), "general");
        assert_ne!(a, b);
    }

    #[test]
    fn test_deterministic_ids() {
        let mut r1 = resolver();
        let mut r2 = resolver();
        let a = r1.resolve(&span("Lung Cancer", "disease"), "medical");
        let b = r2.resolve(&span("lung  cancer", "Disease"), "medical");
        assert_eq!(a, b);
        assert_eq!(a, entity_id("Lung Cancer", "disease"));
    }

    #[test]
    fn test_lookup() {
        let mut r = resolver();
        let id = r.resolve(&span("Acme", "organization"), "general");
        assert_eq!(r.lookup("ACME", "organization"), Some(id));
        assert_eq!(r.lookup("Unknown", "organization"), None);
    }
}
