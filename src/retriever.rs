//! Hybrid retrieval: parallel strategy execution and weighted
//! reciprocal-rank fusion

use crate::bm25::KeywordIndex;
use crate::cache::{query_hash, RetrievalCache};
use crate::config::RetrievalConfig;
use crate::embedder::Embedder;
use crate::error::{EngineError, Result};
use crate::graph::GraphStore;
use crate::ingest::ChunkCatalog;
use crate::types::{Entity, QueryPlan, RankedChunk, RetrievedContext, StrategyKind};
use crate::vector::{VectorFilter, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Caller-side knobs for one retrieval
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    /// Fused chunks to return; None uses the configured default
    pub top_k: Option<usize>,
    /// Restrict all strategies to one domain
    pub domain: Option<String>,
}

/// One strategy's ranked output
struct StrategyOutcome {
    /// (chunk id, raw score) sorted best-first
    ranked: Vec<(String, f32)>,
    /// Entities that contributed (graph strategy only)
    entities: Vec<Uuid>,
}

/// Hybrid retriever over vector, graph and keyword strategies.
///
/// Strategies run concurrently under a hard per-component deadline and a
/// soft global deadline; losing a component degrades the result instead of
/// failing the query.
pub struct HybridRetriever {
    config: RetrievalConfig,
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    keyword: Arc<RwLock<KeywordIndex>>,
    catalog: Arc<ChunkCatalog>,
    cache: Arc<RetrievalCache>,
}

impl HybridRetriever {
    pub fn new(
        config: RetrievalConfig,
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        keyword: Arc<RwLock<KeywordIndex>>,
        catalog: Arc<ChunkCatalog>,
        cache: Arc<RetrievalCache>,
    ) -> Self {
        Self {
            config,
            embedder,
            vector,
            graph,
            keyword,
            catalog,
            cache,
        }
    }

    /// Execute the plan's strategies and fuse their rankings.
    ///
    /// `generation` is the current store generation, used for cache keying.
    pub async fn retrieve(
        &self,
        query: &str,
        plan: &QueryPlan,
        options: &RetrievalOptions,
        generation: u64,
    ) -> Result<RetrievedContext> {
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(EngineError::InvalidInput("top_k must be >= 1".to_string()));
        }
        let fetch_k = top_k.saturating_mul(self.config.overfetch_factor.max(1));

        let cache_query = match &options.domain {
            Some(domain) => query_hash(&format!("{}\u{1f}{}\u{1f}{}", query, domain, top_k)),
            None => query_hash(&format!("{}\u{1f}\u{1f}{}", query, top_k)),
        };
        let plan_hash = plan.cache_hash();
        if let Some(cached) = self.cache.get(cache_query, plan_hash, generation).await {
            return Ok(cached);
        }

        let component_deadline = Duration::from_millis(self.config.component_deadline_ms);
        let global_deadline = Duration::from_millis(self.config.global_deadline_ms);

        // Launch every active component concurrently
        let mut tasks = Vec::new();
        for component in &plan.components {
            let kind = component.kind;
            let weight = component.weight;
            let query = query.to_string();
            let domain = options.domain.clone();
            let plan = plan.clone();
            let retriever = self.clone_refs();

            let handle = tokio::spawn(async move {
                let work = async {
                    match kind {
                        StrategyKind::Vector => {
                            retriever.vector_strategy(&query, domain.as_deref(), fetch_k).await
                        }
                        StrategyKind::Graph => {
                            retriever.graph_strategy(&plan, fetch_k).await
                        }
                        StrategyKind::Keyword => {
                            retriever.keyword_strategy(&query, domain.as_deref(), fetch_k).await
                        }
                    }
                };
                match tokio::time::timeout(component_deadline, work).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::timeout(
                        format!("{} strategy", kind),
                        component_deadline.as_millis() as u64,
                    )),
                }
            });
            tasks.push((kind, weight, handle));
        }

        // Soft global deadline over the whole fan-out; stragglers are aborted
        let started = tokio::time::Instant::now();
        let mut outcomes: Vec<(StrategyKind, f32, StrategyOutcome)> = Vec::new();
        let mut degraded: Vec<StrategyKind> = Vec::new();
        let mut lost_weight = 0.0f32;

        for (kind, weight, handle) in tasks {
            let abort = handle.abort_handle();
            let remaining = global_deadline.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(Ok(outcome))) => outcomes.push((kind, weight, outcome)),
                Ok(Ok(Err(e))) => {
                    warn!("{} strategy degraded: {}", kind, e);
                    degraded.push(kind);
                    lost_weight += weight;
                }
                Ok(Err(join_error)) => {
                    warn!("{} strategy task failed: {}", kind, join_error);
                    degraded.push(kind);
                    lost_weight += weight;
                }
                Err(_) => {
                    abort.abort();
                    warn!("{} strategy lost to the global deadline", kind);
                    degraded.push(kind);
                    lost_weight += weight;
                }
            }
        }

        let context = self
            .fuse(plan, outcomes, degraded, lost_weight, top_k)
            .await;
        self.cache
            .insert(cache_query, plan_hash, generation, context.clone())
            .await;
        Ok(context)
    }

    /// Cheap handle bundle for strategy tasks
    fn clone_refs(&self) -> RetrieverRefs {
        RetrieverRefs {
            embedder: Arc::clone(&self.embedder),
            vector: Arc::clone(&self.vector),
            graph: Arc::clone(&self.graph),
            keyword: Arc::clone(&self.keyword),
        }
    }

    /// Weighted reciprocal-rank fusion over the surviving strategies
    async fn fuse(
        &self,
        plan: &QueryPlan,
        outcomes: Vec<(StrategyKind, f32, StrategyOutcome)>,
        degraded: Vec<StrategyKind>,
        lost_weight: f32,
        top_k: usize,
    ) -> RetrievedContext {
        let confidence = (plan.confidence * (1.0 - lost_weight)).max(0.0);
        if outcomes.is_empty() {
            let mut context = RetrievedContext::empty(confidence);
            context.partial = !degraded.is_empty();
            context.degraded_strategies = degraded;
            return context;
        }

        // Remaining weights renormalize to 1
        let surviving: f32 = outcomes.iter().map(|(_, w, _)| *w).sum();
        let rrf_k = self.config.rrf_k as f32;

        struct Fused {
            score: f32,
            strategies: Vec<StrategyKind>,
            best_normalized: f32,
        }
        let mut fused: HashMap<String, Fused> = HashMap::new();
        let mut entity_ids: Vec<Uuid> = Vec::new();

        for (kind, weight, outcome) in &outcomes {
            let weight = if surviving > 0.0 { weight / surviving } else { 0.0 };
            let normalized = min_max_normalize(&outcome.ranked);
            for (rank, ((chunk_id, _raw), norm)) in
                outcome.ranked.iter().zip(normalized.iter()).enumerate()
            {
                let contribution = weight / (rrf_k + rank as f32 + 1.0);
                let entry = fused.entry(chunk_id.clone()).or_insert(Fused {
                    score: 0.0,
                    strategies: Vec::new(),
                    best_normalized: 0.0,
                });
                entry.score += contribution;
                if !entry.strategies.contains(kind) {
                    entry.strategies.push(*kind);
                }
                entry.best_normalized = entry.best_normalized.max(*norm);
            }
            entity_ids.extend(outcome.entities.iter().copied());
        }

        let mut ranked: Vec<(String, Fused)> = fused.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.strategies.len().cmp(&a.1.strategies.len()))
                .then_with(|| {
                    b.1.best_normalized
                        .partial_cmp(&a.1.best_normalized)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);

        let chunk_ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let chunk_map: HashMap<String, _> = self
            .catalog
            .get_many(&chunk_ids)
            .await
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let chunks: Vec<RankedChunk> = ranked
            .into_iter()
            .filter_map(|(chunk_id, fused)| {
                // Consistency lag: a chunk may be ranked but not yet readable
                chunk_map.get(&chunk_id).map(|chunk| RankedChunk {
                    chunk: chunk.clone(),
                    score: fused.score,
                    strategies: fused.strategies,
                    best_normalized: fused.best_normalized,
                })
            })
            .collect();

        // Entities that led to chunks via the graph strategy
        entity_ids.sort();
        entity_ids.dedup();
        let mut entities: Vec<Entity> = Vec::new();
        for id in entity_ids {
            if let Ok(Some(entity)) = self.graph.get_entity(id).await {
                entities.push(entity);
            }
        }

        debug!(
            "fused {} chunks from {} strategies ({} degraded)",
            chunks.len(),
            outcomes.len(),
            degraded.len()
        );

        RetrievedContext {
            chunks,
            entities,
            paths: Vec::new(),
            partial: !degraded.is_empty(),
            degraded_strategies: degraded,
            confidence,
        }
    }
}

/// Shared state passed into spawned strategy tasks
struct RetrieverRefs {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    keyword: Arc<RwLock<KeywordIndex>>,
}

impl RetrieverRefs {
    async fn vector_strategy(
        &self,
        query: &str,
        domain: Option<&str>,
        fetch_k: usize,
    ) -> Result<StrategyOutcome> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::DataIntegrity("embedder returned no vector".into()))?;

        let filter = domain.map(|d| VectorFilter {
            domain: Some(d.to_string()),
            document_id: None,
        });
        let points = self
            .vector
            .query(&vector, fetch_k, filter.as_ref())
            .await?;

        Ok(StrategyOutcome {
            ranked: points
                .into_iter()
                .map(|p| (p.chunk_id, p.similarity))
                .collect(),
            entities: Vec::new(),
        })
    }

    /// Pull chunks mentioned along neighbor paths of the known query
    /// entities, scored by Σ 1/(1+hops) × path confidence
    async fn graph_strategy(&self, plan: &QueryPlan, fetch_k: usize) -> Result<StrategyOutcome> {
        let known = plan.known_entity_ids();
        if known.is_empty() {
            return Ok(StrategyOutcome {
                ranked: Vec::new(),
                entities: Vec::new(),
            });
        }

        // entity -> best (hop distance, path confidence)
        let mut reach: HashMap<Uuid, (u32, f32)> = HashMap::new();
        for root in &known {
            reach.entry(*root).or_insert((0, 1.0));
            for path in self.graph.neighbors(*root, plan.max_hops, None).await? {
                let confidence: f32 = path.relations.iter().map(|r| r.confidence).product();
                let entry = reach.entry(path.target()).or_insert((path.hops, confidence));
                if path.hops < entry.0 || (path.hops == entry.0 && confidence > entry.1) {
                    *entry = (path.hops, confidence);
                }
            }
        }

        let entity_ids: Vec<Uuid> = reach.keys().copied().collect();
        let chunk_lists = self.graph.chunks_for_entities(&entity_ids).await?;

        let mut scores: HashMap<String, f32> = HashMap::new();
        for (entity_id, chunk_ids) in &chunk_lists {
            let (hops, confidence) = reach[entity_id];
            let contribution = confidence / (1.0 + hops as f32);
            for chunk_id in chunk_ids {
                *scores.entry(chunk_id.clone()).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(fetch_k);

        Ok(StrategyOutcome {
            ranked,
            entities: entity_ids,
        })
    }

    async fn keyword_strategy(
        &self,
        query: &str,
        domain: Option<&str>,
        fetch_k: usize,
    ) -> Result<StrategyOutcome> {
        let index = self.keyword.read().await;
        Ok(StrategyOutcome {
            ranked: index.search(query, fetch_k, domain),
            entities: Vec::new(),
        })
    }
}

/// Min-max normalization to [0, 1]; degenerate sets fall back to the raw
/// score clipped into range
fn min_max_normalize(ranked: &[(String, f32)]) -> Vec<f32> {
    if ranked.is_empty() {
        return Vec::new();
    }
    let max = ranked
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let min = ranked.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    if ranked.len() <= 1 || (max - min).abs() < f32::EPSILON {
        return ranked.iter().map(|(_, s)| s.clamp(0.0, 1.0)).collect();
    }
    ranked
        .iter()
        .map(|(_, s)| (s - min) / (max - min))
        .collect()
}
