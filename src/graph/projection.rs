//! Filtered, bounded projections over the knowledge graph

use crate::error::{EngineError, Result};
use crate::types::{Entity, Relation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use utoipa::ToSchema;

/// Hard cap on entities a single projection may return
pub const MAX_ENTITIES_CAP: usize = 5000;
/// Hard cap on relations a single projection may return
pub const MAX_RELATIONS_CAP: usize = 10_000;

/// Entity sort key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Occurrence,
    Confidence,
    Name,
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Projection filter; every field optional with documented defaults
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphFilter {
    /// Restrict to one domain; None means no constraint
    #[serde(default)]
    pub domain: Option<String>,

    /// Entity budget, >= 1, clamped to the hard cap
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,

    /// Relation budget, >= 1, clamped to the hard cap
    #[serde(default = "default_max_relations")]
    pub max_relations: usize,

    /// Entities below this occurrence are skipped; also the relation weight floor
    #[serde(default = "default_min_occurrence")]
    pub min_occurrence: u64,

    /// Entities below this confidence are skipped
    #[serde(default)]
    pub min_confidence: f32,

    /// Empty means any type
    #[serde(default)]
    pub entity_types: BTreeSet<String>,

    /// Empty means any type
    #[serde(default)]
    pub relation_types: BTreeSet<String>,

    #[serde(default)]
    pub sort_by: SortBy,

    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_max_entities() -> usize {
    500
}

fn default_max_relations() -> usize {
    500
}

fn default_min_occurrence() -> u64 {
    1
}

impl Default for GraphFilter {
    fn default() -> Self {
        Self {
            domain: None,
            max_entities: default_max_entities(),
            max_relations: default_max_relations(),
            min_occurrence: default_min_occurrence(),
            min_confidence: 0.0,
            entity_types: BTreeSet::new(),
            relation_types: BTreeSet::new(),
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl GraphFilter {
    /// Validate bounds and clamp budgets to the hard caps
    pub fn validated(mut self) -> Result<Self> {
        if self.max_entities == 0 {
            return Err(EngineError::InvalidInput(
                "max_entities must be >= 1".to_string(),
            ));
        }
        if self.max_relations == 0 {
            return Err(EngineError::InvalidInput(
                "max_relations must be >= 1".to_string(),
            ));
        }
        if self.min_occurrence == 0 {
            return Err(EngineError::InvalidInput(
                "min_occurrence must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(EngineError::InvalidInput(
                "min_confidence must be within [0, 1]".to_string(),
            ));
        }
        self.max_entities = self.max_entities.min(MAX_ENTITIES_CAP);
        self.max_relations = self.max_relations.min(MAX_RELATIONS_CAP);
        Ok(self)
    }

    fn matches_entity(&self, entity: &Entity) -> bool {
        if let Some(domain) = &self.domain {
            if &entity.domain != domain {
                return false;
            }
        }
        if !self.entity_types.is_empty() && !self.entity_types.contains(&entity.entity_type) {
            return false;
        }
        entity.occurrence >= self.min_occurrence && entity.confidence >= self.min_confidence
    }

    fn matches_relation(&self, relation: &Relation) -> bool {
        if !self.relation_types.is_empty() && !self.relation_types.contains(&relation.relation_type)
        {
            return false;
        }
        relation.weight >= self.min_occurrence
    }
}

/// Counts before any filtering was applied
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct ProjectionTotals {
    pub entities: usize,
    pub relations: usize,
}

/// A bounded subgraph view
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphProjection {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub totals_before_filter: ProjectionTotals,
    /// The filter after validation/clamping
    pub applied_filter: GraphFilter,
}

/// Apply the projection algorithm: select + sort + truncate entities, then
/// relations whose endpoints both survived
pub fn project(
    all_entities: Vec<Entity>,
    all_relations: Vec<Relation>,
    filter: &GraphFilter,
) -> GraphProjection {
    let totals = ProjectionTotals {
        entities: all_entities.len(),
        relations: all_relations.len(),
    };

    let mut entities: Vec<Entity> = all_entities
        .into_iter()
        .filter(|e| filter.matches_entity(e))
        .collect();

    entities.sort_by(|a, b| {
        let ordering = match filter.sort_by {
            SortBy::Occurrence => a.occurrence.cmp(&b.occurrence),
            SortBy::Confidence => a
                .confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal),
            SortBy::Name => a.name.cmp(&b.name),
        };
        let ordering = match filter.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        // Stable under equal keys
        ordering
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    entities.truncate(filter.max_entities);

    let selected: HashSet<_> = entities.iter().map(|e| e.id).collect();

    let mut relations: Vec<Relation> = all_relations
        .into_iter()
        .filter(|r| {
            selected.contains(&r.source_id)
                && selected.contains(&r.target_id)
                && filter.matches_relation(r)
        })
        .collect();

    relations.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| a.source_id.cmp(&b.source_id))
            .then_with(|| a.target_id.cmp(&b.target_id))
            .then_with(|| a.relation_type.cmp(&b.relation_type))
    });
    relations.truncate(filter.max_relations);

    GraphProjection {
        entities,
        relations,
        totals_before_filter: totals,
        applied_filter: filter.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::entity_id;

    fn entity(name: &str, occurrence: u64, confidence: f32) -> Entity {
        let mut e = Entity::new(name, "concept", "general", confidence);
        e.occurrence = occurrence;
        e
    }

    #[test]
    fn test_filter_validation() {
        let bad = GraphFilter {
            max_entities: 0,
            ..Default::default()
        };
        assert!(bad.validated().is_err());

        let oversized = GraphFilter {
            max_entities: 1_000_000,
            max_relations: 1_000_000,
            ..Default::default()
        };
        let clamped = oversized.validated().unwrap();
        assert_eq!(clamped.max_entities, MAX_ENTITIES_CAP);
        assert_eq!(clamped.max_relations, MAX_RELATIONS_CAP);
    }

    #[test]
    fn test_projection_caps_and_endpoint_closure() {
        let entities: Vec<Entity> = (0..20)
            .map(|i| entity(&format!("entity {}", i), (i + 1) as u64, 0.8))
            .collect();
        let relations: Vec<Relation> = (0..19)
            .map(|i| {
                Relation::new(
                    entity_id(&format!("entity {}", i), "concept"),
                    entity_id(&format!("entity {}", i + 1), "concept"),
                    "related_to",
                    "ctx",
                    0.8,
                    "general",
                )
            })
            .collect();

        let filter = GraphFilter {
            max_entities: 5,
            max_relations: 3,
            ..Default::default()
        }
        .validated()
        .unwrap();

        let projection = project(entities, relations, &filter);
        assert!(projection.entities.len() <= 5);
        assert!(projection.relations.len() <= 3);
        assert_eq!(projection.totals_before_filter.entities, 20);
        assert_eq!(projection.totals_before_filter.relations, 19);

        let ids: HashSet<_> = projection.entities.iter().map(|e| e.id).collect();
        for relation in &projection.relations {
            assert!(ids.contains(&relation.source_id));
            assert!(ids.contains(&relation.target_id));
        }
    }

    #[test]
    fn test_projection_sorts_by_occurrence_desc() {
        let entities = vec![entity("low", 1, 0.9), entity("high", 10, 0.1)];
        let projection = project(entities, vec![], &GraphFilter::default());
        assert_eq!(projection.entities[0].name, "high");
    }

    #[test]
    fn test_projection_more_requested_than_present() {
        let entities = vec![entity("only", 3, 0.5)];
        let filter = GraphFilter {
            max_entities: 10_000,
            ..Default::default()
        }
        .validated()
        .unwrap();
        let projection = project(entities, vec![], &filter);
        assert_eq!(projection.entities.len(), 1);
    }

    #[test]
    fn test_projection_min_occurrence_excludes() {
        let entities = vec![entity("rare", 1, 0.5), entity("common", 5, 0.5)];
        let filter = GraphFilter {
            min_occurrence: 3,
            ..Default::default()
        };
        let projection = project(entities, vec![], &filter);
        assert_eq!(projection.entities.len(), 1);
        assert_eq!(projection.entities[0].name, "common");
    }
}
