//! Reasoning paths over the knowledge graph: direct, causal, comparative
//! and multi-hop beam search

use crate::config::ReasoningConfig;
use crate::error::Result;
use crate::graph::{GraphPath, GraphStore};
use crate::types::{
    QueryPlan, ReasoningKind, ReasoningMode, ReasoningPath, RetrievedContext,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Builds explanation paths to accompany retrieved chunks.
///
/// Graph-store failures never fail the query; reasoning falls back to
/// entity co-occurrence within the fused chunks.
pub struct ReasoningEngine {
    config: ReasoningConfig,
    graph: Arc<dyn GraphStore>,
}

impl ReasoningEngine {
    pub fn new(config: ReasoningConfig, graph: Arc<dyn GraphStore>) -> Self {
        Self { config, graph }
    }

    /// Produce up to the configured number of paths for the plan's
    /// reasoning mode
    pub async fn reason(&self, plan: &QueryPlan, context: &RetrievedContext) -> Vec<ReasoningPath> {
        self.reason_as(plan.reasoning, plan, context).await
    }

    /// Same, with an explicit mode (the dedicated reasoning endpoints)
    pub async fn reason_as(
        &self,
        mode: ReasoningMode,
        plan: &QueryPlan,
        context: &RetrievedContext,
    ) -> Vec<ReasoningPath> {
        let outcome = match mode {
            ReasoningMode::None => return Vec::new(),
            ReasoningMode::Causal => self.causal(plan).await,
            ReasoningMode::Comparative => self.comparative(plan).await,
            // Beam search plus direct pairwise paths between known entities
            ReasoningMode::MultiHop => {
                match (self.direct(plan).await, self.multi_hop(plan).await) {
                    (Ok(mut direct), Ok(multi)) => {
                        direct.extend(multi);
                        Ok(direct)
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
        };

        let mut paths = match outcome {
            Ok(paths) => paths,
            Err(e) => {
                warn!("graph reasoning unavailable ({}), using co-occurrence", e);
                self.cooccurrence_fallback(plan, context)
            }
        };

        paths.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        paths.truncate(self.config.max_paths);
        debug!("reasoning produced {} paths ({:?})", paths.len(), mode);
        paths
    }

    /// Shortest paths between every ordered pair of known query entities
    pub async fn direct(&self, plan: &QueryPlan) -> Result<Vec<ReasoningPath>> {
        let known = plan.known_entity_ids();
        let mut paths = Vec::new();

        for source in &known {
            let reachable = self.graph.neighbors(*source, plan.max_hops, None).await?;
            for target in &known {
                if source == target {
                    continue;
                }
                // BFS order makes the first match the shortest
                if let Some(path) = reachable.iter().find(|p| p.target() == *target) {
                    paths.push(self.materialize(ReasoningKind::Direct, path).await?);
                }
            }
        }
        Ok(paths)
    }

    /// Chains restricted to the configured causal relation set
    pub async fn causal(&self, plan: &QueryPlan) -> Result<Vec<ReasoningPath>> {
        let known = plan.known_entity_ids();
        let causal_types = self.config.causal_relation_types.clone();
        let mut paths = Vec::new();

        for root in &known {
            for path in self
                .graph
                .neighbors(*root, plan.max_hops, Some(&causal_types))
                .await?
            {
                paths.push(self.materialize(ReasoningKind::Causal, &path).await?);
            }
        }
        Ok(paths)
    }

    /// Hop-1 neighborhood overlap between pairs of known entities
    pub async fn comparative(&self, plan: &QueryPlan) -> Result<Vec<ReasoningPath>> {
        let known = plan.known_entity_ids();
        let mut paths = Vec::new();

        for i in 0..known.len() {
            for j in (i + 1)..known.len() {
                let (a, b) = (known[i], known[j]);
                let near_a = self.graph.neighbors(a, 1, None).await?;
                let near_b = self.graph.neighbors(b, 1, None).await?;

                let set_a: HashSet<Uuid> = near_a.iter().map(GraphPath::target).collect();
                let set_b: HashSet<Uuid> = near_b.iter().map(GraphPath::target).collect();
                let shared: Vec<Uuid> = set_a.intersection(&set_b).copied().collect();
                let union = set_a.union(&set_b).count();

                let overlap = if union > 0 {
                    shared.len() as f32 / union as f32
                } else {
                    0.0
                };

                // Evidence: chunks mentioning both comparands
                let mention_map = self.graph.chunks_for_entities(&[a, b]).await?;
                let chunks_a: HashSet<&String> =
                    mention_map.get(&a).map(|v| v.iter().collect()).unwrap_or_default();
                let evidence: Vec<String> = mention_map
                    .get(&b)
                    .map(|v| {
                        v.iter()
                            .filter(|c| chunks_a.contains(c))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                let mut entities = Vec::new();
                for id in [a, b].iter().chain(shared.iter().take(3)) {
                    if let Some(entity) = self.graph.get_entity(*id).await? {
                        entities.push(entity.name);
                    }
                }

                let mut edges = Vec::new();
                for path in near_a.iter().chain(near_b.iter()) {
                    if shared.contains(&path.target()) {
                        edges.extend(path.relations.iter().cloned());
                    }
                }

                let confidence = if overlap > 0.0 {
                    overlap
                } else if evidence.is_empty() {
                    0.0
                } else {
                    0.2
                };

                paths.push(ReasoningPath {
                    kind: ReasoningKind::Comparative,
                    entities,
                    edges,
                    evidence_chunks: evidence,
                    confidence,
                });
            }
        }
        Ok(paths)
    }

    /// Beam search over neighbors, scoring by edge confidence and target
    /// occurrence
    pub async fn multi_hop(&self, plan: &QueryPlan) -> Result<Vec<ReasoningPath>> {
        let known = plan.known_entity_ids();
        let mut collected = Vec::new();

        for root in &known {
            // (path, beam score)
            let mut frontier: Vec<(GraphPath, f32)> = vec![(
                GraphPath {
                    entity_ids: vec![*root],
                    relations: Vec::new(),
                    hops: 0,
                },
                1.0,
            )];

            for _depth in 0..plan.max_hops {
                let mut candidates: Vec<(GraphPath, f32)> = Vec::new();
                for (path, score) in &frontier {
                    let steps = self.graph.neighbors(path.target(), 1, None).await?;
                    for step in steps {
                        let target = step.target();
                        if path.entity_ids.contains(&target) {
                            continue;
                        }
                        let occurrence = self
                            .graph
                            .get_entity(target)
                            .await?
                            .map(|e| e.occurrence.max(1))
                            .unwrap_or(1);
                        let edge_confidence = step
                            .relations
                            .first()
                            .map(|r| r.confidence)
                            .unwrap_or(0.0);
                        let step_score = edge_confidence * (occurrence as f32).powf(0.25);

                        let mut entity_ids = path.entity_ids.clone();
                        entity_ids.push(target);
                        let mut relations = path.relations.clone();
                        relations.extend(step.relations);
                        candidates.push((
                            GraphPath {
                                entity_ids,
                                relations,
                                hops: path.hops + 1,
                            },
                            score * step_score,
                        ));
                    }
                }

                candidates.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                candidates.truncate(self.config.beam_width);
                if candidates.is_empty() {
                    break;
                }
                collected.extend(candidates.iter().cloned());
                frontier = candidates;
            }
        }

        let mut paths = Vec::new();
        for (path, _score) in collected {
            paths.push(self.materialize(ReasoningKind::MultiHop, &path).await?);
        }
        Ok(paths)
    }

    /// Chunk-only reasoning from entity co-occurrence in the fused context
    fn cooccurrence_fallback(
        &self,
        plan: &QueryPlan,
        context: &RetrievedContext,
    ) -> Vec<ReasoningPath> {
        let names: Vec<&str> = plan.entities.iter().map(|e| e.name.as_str()).collect();
        let mut paths = Vec::new();

        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                let evidence: Vec<String> = context
                    .chunks
                    .iter()
                    .filter(|ranked| {
                        let text = ranked.chunk.text.to_lowercase();
                        text.contains(&names[i].to_lowercase())
                            && text.contains(&names[j].to_lowercase())
                    })
                    .map(|ranked| ranked.chunk.id.clone())
                    .collect();
                if evidence.is_empty() {
                    continue;
                }
                paths.push(ReasoningPath {
                    kind: ReasoningKind::Direct,
                    entities: vec![names[i].to_string(), names[j].to_string()],
                    edges: Vec::new(),
                    evidence_chunks: evidence,
                    confidence: 0.3,
                });
            }
        }
        paths
    }

    /// Resolve a graph path into a presentable reasoning path
    async fn materialize(&self, kind: ReasoningKind, path: &GraphPath) -> Result<ReasoningPath> {
        let mut entities = Vec::with_capacity(path.entity_ids.len());
        for id in &path.entity_ids {
            let name = self
                .graph
                .get_entity(*id)
                .await?
                .map(|e| e.name)
                .unwrap_or_else(|| id.to_string());
            entities.push(name);
        }

        let length = path.relations.len().max(1) as f32;
        let confidence = path
            .relations
            .iter()
            .map(|r| r.confidence)
            .product::<f32>()
            / length;

        // Chunks naming the most path entities make the best evidence
        let mention_map = self.graph.chunks_for_entities(&path.entity_ids).await?;
        let mut chunk_hits: HashMap<String, usize> = HashMap::new();
        for chunk_ids in mention_map.values() {
            for chunk_id in chunk_ids {
                *chunk_hits.entry(chunk_id.clone()).or_insert(0) += 1;
            }
        }
        let mut evidence: Vec<(String, usize)> = chunk_hits.into_iter().collect();
        evidence.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let evidence_chunks: Vec<String> =
            evidence.into_iter().take(3).map(|(id, _)| id).collect();

        Ok(ReasoningPath {
            kind,
            entities,
            edges: path.relations.clone(),
            evidence_chunks,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphStore;
    use crate::types::{
        entity_id, Complexity, Entity, Mention, QueryEntity, QueryIntent, Relation,
        StrategyComponent, StrategyKind,
    };

    async fn causal_graph() -> Arc<dyn GraphStore> {
        let graph = Arc::new(InMemoryGraphStore::new());
        let smoking = Entity::new("smoking", "behavior", "medical", 0.9);
        let pollution = Entity::new("air pollution", "condition", "medical", 0.8);
        let cancer = Entity::new("lung cancer", "disease", "medical", 0.9);

        graph
            .upsert_entities(vec![smoking.clone(), pollution.clone(), cancer.clone()])
            .await
            .unwrap();
        graph
            .upsert_relations(vec![
                Relation::new(smoking.id, cancer.id, "causes", "smoking causes lung cancer", 0.9, "medical"),
                Relation::new(
                    pollution.id,
                    cancer.id,
                    "causes",
                    "air pollution causes lung cancer",
                    0.7,
                    "medical",
                ),
            ])
            .await
            .unwrap();
        graph
            .add_mentions(vec![
                Mention {
                    entity_id: smoking.id,
                    chunk_id: "med:0".to_string(),
                    offset_span: None,
                },
                Mention {
                    entity_id: cancer.id,
                    chunk_id: "med:0".to_string(),
                    offset_span: None,
                },
                Mention {
                    entity_id: pollution.id,
                    chunk_id: "med:1".to_string(),
                    offset_span: None,
                },
                Mention {
                    entity_id: cancer.id,
                    chunk_id: "med:1".to_string(),
                    offset_span: None,
                },
            ])
            .await
            .unwrap();
        graph
    }

    fn plan(reasoning: ReasoningMode, entities: Vec<QueryEntity>) -> QueryPlan {
        QueryPlan {
            intent: QueryIntent::Causal,
            complexity: Complexity::Medium,
            entities,
            components: vec![StrategyComponent {
                kind: StrategyKind::Graph,
                weight: 1.0,
            }],
            reasoning,
            max_hops: 2,
            confidence: 0.85,
        }
    }

    #[tokio::test]
    async fn test_causal_chains_ranked_by_confidence() {
        let graph = causal_graph().await;
        let engine = ReasoningEngine::new(ReasoningConfig::default(), graph);

        let plan = plan(
            ReasoningMode::Causal,
            vec![QueryEntity {
                name: "lung cancer".to_string(),
                entity_id: Some(entity_id("lung cancer", "disease")),
            }],
        );
        let context = RetrievedContext::empty(0.8);
        let paths = engine.reason(&plan, &context).await;

        assert!(paths.len() >= 2);
        assert!(paths[0].confidence >= paths[1].confidence);
        assert!(paths[0].entities.iter().any(|n| n == "smoking"));
        assert!(paths
            .iter()
            .all(|p| p.edges.iter().all(|e| e.relation_type == "causes")));
    }

    #[tokio::test]
    async fn test_multi_hop_beam() {
        let graph = causal_graph().await;
        let engine = ReasoningEngine::new(ReasoningConfig::default(), graph);

        let plan = plan(
            ReasoningMode::MultiHop,
            vec![QueryEntity {
                name: "smoking".to_string(),
                entity_id: Some(entity_id("smoking", "behavior")),
            }],
        );
        let paths = engine.reason(&plan, &RetrievedContext::empty(0.8)).await;

        assert!(!paths.is_empty());
        // smoking -> lung cancer -> air pollution is reachable in two hops
        assert!(paths.iter().any(|p| p.entities.len() == 3));
        assert!(paths.len() <= ReasoningConfig::default().max_paths);
    }

    #[tokio::test]
    async fn test_comparative_overlap() {
        let graph = causal_graph().await;
        let engine = ReasoningEngine::new(ReasoningConfig::default(), graph);

        let plan = plan(
            ReasoningMode::Comparative,
            vec![
                QueryEntity {
                    name: "smoking".to_string(),
                    entity_id: Some(entity_id("smoking", "behavior")),
                },
                QueryEntity {
                    name: "air pollution".to_string(),
                    entity_id: Some(entity_id("air pollution", "condition")),
                },
            ],
        );
        let paths = engine.reason(&plan, &RetrievedContext::empty(0.8)).await;

        assert_eq!(paths.len(), 1);
        // Both cause lung cancer, so the neighborhoods overlap
        assert!(paths[0].confidence > 0.0);
        assert!(paths[0].entities.iter().any(|n| n == "lung cancer"));
    }

    #[tokio::test]
    async fn test_direct_shortest_path() {
        let graph = causal_graph().await;
        let engine = ReasoningEngine::new(ReasoningConfig::default(), graph);

        let plan = plan(
            ReasoningMode::Causal,
            vec![
                QueryEntity {
                    name: "smoking".to_string(),
                    entity_id: Some(entity_id("smoking", "behavior")),
                },
                QueryEntity {
                    name: "lung cancer".to_string(),
                    entity_id: Some(entity_id("lung cancer", "disease")),
                },
            ],
        );
        let paths = engine.direct(&plan).await.unwrap();
        assert!(!paths.is_empty());
        assert_eq!(paths[0].edges.len(), 1);
        assert!(!paths[0].evidence_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_no_reasoning_mode() {
        let graph = causal_graph().await;
        let engine = ReasoningEngine::new(ReasoningConfig::default(), graph);
        let plan = plan(ReasoningMode::None, vec![]);
        assert!(engine
            .reason(&plan, &RetrievedContext::empty(0.8))
            .await
            .is_empty());
    }
}
