//! Property-based tests for the engine's core invariants

use graphfusion::chunker::{ContentChunker, DocumentFormat};
use graphfusion::config::ChunkingConfig;
use graphfusion::graph::projection::{project, GraphFilter};
use graphfusion::types::{entity_id, normalize_name, Entity, Relation};
use proptest::prelude::*;
use std::collections::HashSet;

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ]{0,30}"
}

proptest! {
    /// Entity ids are a pure function of (normalized name, type)
    #[test]
    fn entity_id_deterministic(name in name_strategy(), entity_type in "[a-z]{1,12}") {
        prop_assert_eq!(
            entity_id(&name, &entity_type),
            entity_id(&name, &entity_type)
        );

        // Case and whitespace folding collapse to the same id
        let shouty = name.to_uppercase();
        let padded = format!("  {}  ", name);
        prop_assert_eq!(entity_id(&name, &entity_type), entity_id(&shouty, &entity_type));
        prop_assert_eq!(entity_id(&name, &entity_type), entity_id(&padded, &entity_type));
    }

    /// Normalization is idempotent
    #[test]
    fn normalize_idempotent(name in ".{0,60}") {
        let once = normalize_name(&name);
        prop_assert_eq!(normalize_name(&once), once.clone());
    }

    /// Projections never exceed their caps and returned relations only
    /// connect returned entities
    #[test]
    fn projection_caps_hold(
        entity_count in 0usize..120,
        max_entities in 1usize..40,
        max_relations in 1usize..40,
        min_occurrence in 1u64..5,
    ) {
        let entities: Vec<Entity> = (0..entity_count)
            .map(|i| {
                let mut e = Entity::new(&format!("node {}", i), "concept", "general", 0.5);
                e.occurrence = (i as u64 % 7) + 1;
                e
            })
            .collect();
        let relations: Vec<Relation> = entities
            .windows(2)
            .map(|pair| {
                let mut r = Relation::new(
                    pair[0].id,
                    pair[1].id,
                    "related_to",
                    "ctx",
                    0.5,
                    "general",
                );
                r.weight = (pair[0].occurrence + pair[1].occurrence) / 2;
                r
            })
            .collect();

        let filter = GraphFilter {
            max_entities,
            max_relations,
            min_occurrence,
            ..Default::default()
        }
        .validated()
        .unwrap();

        let projection = project(entities, relations, &filter);
        prop_assert!(projection.entities.len() <= max_entities);
        prop_assert!(projection.relations.len() <= max_relations);
        prop_assert!(projection
            .entities
            .iter()
            .all(|e| e.occurrence >= min_occurrence));

        let ids: HashSet<_> = projection.entities.iter().map(|e| e.id).collect();
        prop_assert!(projection
            .relations
            .iter()
            .all(|r| ids.contains(&r.source_id) && ids.contains(&r.target_id)));
    }

    /// Chunk ordinals are dense from zero and every chunk is non-empty
    #[test]
    fn chunker_ordinals_dense(
        sentence_count in 1usize..40,
        budget in 10usize..200,
    ) {
        let text: String = (0..sentence_count)
            .map(|i| format!("Sentence {} describes subject {}.", i, i * 3))
            .collect::<Vec<_>>()
            .join(" ");
        let config = ChunkingConfig {
            token_budget: budget,
            token_slack: budget / 4,
            overlap_sentences: 1,
            ..Default::default()
        };

        let chunker = ContentChunker::new(config);
        let chunks = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(chunker.chunk("doc", &text, "general", DocumentFormat::PlainText))
            .unwrap();

        prop_assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.ordinal as usize, i);
            prop_assert!(!chunk.text.trim().is_empty());
        }

        // Coverage: every sentence survives somewhere
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for i in 0..sentence_count {
            prop_assert!(joined.contains(&format!("Sentence {} ", i)), "missing sentence {}", i);
        }
    }

    /// Merging relations accumulates weight and never exceeds the evidence cap
    #[test]
    fn relation_merge_monotonic(observations in 1usize..20) {
        let a = entity_id("a", "t");
        let b = entity_id("b", "t");
        let mut relation = Relation::new(a, b, "causes", "first", 0.4, "general");
        for i in 0..observations {
            let dup = Relation::new(a, b, "causes", &format!("obs {}", i), 0.5, "general");
            relation.merge(&dup);
        }
        prop_assert_eq!(relation.weight as usize, observations + 1);
        prop_assert!(relation.evidence.len() <= graphfusion::types::RELATION_EVIDENCE_CAP);
        prop_assert!(relation.confidence >= 0.4);
    }
}
