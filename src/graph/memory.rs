//! In-process graph store backed by adjacency maps

use super::projection::{self, GraphFilter, GraphProjection};
use super::{GraphDeleteReport, GraphPath, GraphStats, GraphStore, RelationView};
use crate::error::Result;
use crate::types::{normalize_name, Entity, Mention, Relation};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Traversal bound protecting `neighbors` against dense hubs
const MAX_VISITED: usize = 5000;

type RelationKey = (Uuid, Uuid, String);

#[derive(Default)]
struct GraphInner {
    entities: HashMap<Uuid, Entity>,
    relations: HashMap<RelationKey, Relation>,
    /// Edge keys touching each entity, in both directions
    adjacency: HashMap<Uuid, BTreeSet<RelationKey>>,
    /// entity -> chunk ids mentioning it
    mentions: HashMap<Uuid, BTreeSet<String>>,
    /// chunk id -> entities mentioned in it
    chunk_index: HashMap<String, BTreeSet<Uuid>>,
    /// normalized surface form (name or alias) -> entity ids
    name_index: HashMap<String, BTreeSet<Uuid>>,
}

impl GraphInner {
    fn index_name(&mut self, surface: &str, id: Uuid) {
        self.name_index
            .entry(normalize_name(surface))
            .or_default()
            .insert(id);
    }

    fn unlink_entity(&mut self, id: Uuid) -> usize {
        let mut removed_relations = 0;
        if let Some(entity) = self.entities.remove(&id) {
            let mut surfaces = vec![entity.name.clone()];
            surfaces.extend(entity.aliases.iter().cloned());
            for surface in surfaces {
                let key = normalize_name(&surface);
                if let Some(ids) = self.name_index.get_mut(&key) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.name_index.remove(&key);
                    }
                }
            }
        }
        if let Some(edges) = self.adjacency.remove(&id) {
            for key in edges {
                if self.relations.remove(&key).is_some() {
                    removed_relations += 1;
                }
                let other = if key.0 == id { key.1 } else { key.0 };
                if let Some(peer) = self.adjacency.get_mut(&other) {
                    peer.remove(&key);
                }
            }
        }
        self.mentions.remove(&id);
        removed_relations
    }
}

/// In-memory implementation of [`GraphStore`]
pub struct InMemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
        }
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entities(&self, batch: Vec<Entity>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for incoming in batch {
            let id = incoming.id;
            let surfaces: Vec<String> = incoming
                .aliases
                .iter()
                .cloned()
                .chain(std::iter::once(incoming.name.clone()))
                .collect();
            if inner.entities.contains_key(&id) {
                if let Some(existing) = inner.entities.get_mut(&id) {
                    existing.confidence = existing.confidence.max(incoming.confidence);
                    if incoming.name != existing.name {
                        existing.aliases.insert(incoming.name.clone());
                    }
                    existing.aliases.extend(incoming.aliases.iter().cloned());
                    if existing.description.is_empty() && !incoming.description.is_empty() {
                        existing.description = incoming.description.clone();
                    }
                }
            } else {
                // Occurrence is owned by mention accounting, not by the
                // caller's observation count
                let mut entity = incoming;
                entity.occurrence = 0;
                inner.entities.insert(id, entity);
            }
            for surface in &surfaces {
                inner.index_name(surface, id);
            }
        }
        Ok(())
    }

    async fn upsert_relations(&self, batch: Vec<Relation>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for incoming in batch {
            if incoming.source_id == incoming.target_id {
                continue;
            }
            let key = incoming.key();
            if inner.relations.contains_key(&key) {
                if let Some(existing) = inner.relations.get_mut(&key) {
                    existing.merge(&incoming);
                }
            } else {
                inner
                    .adjacency
                    .entry(incoming.source_id)
                    .or_default()
                    .insert(key.clone());
                inner
                    .adjacency
                    .entry(incoming.target_id)
                    .or_default()
                    .insert(key.clone());
                inner.relations.insert(key, incoming);
            }
        }
        Ok(())
    }

    async fn add_mentions(&self, mentions: Vec<Mention>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut new_pairs = 0;
        for mention in mentions {
            if !inner.entities.contains_key(&mention.entity_id) {
                continue;
            }
            let inserted = inner
                .mentions
                .entry(mention.entity_id)
                .or_default()
                .insert(mention.chunk_id.clone());
            if inserted {
                inner
                    .chunk_index
                    .entry(mention.chunk_id.clone())
                    .or_default()
                    .insert(mention.entity_id);
                if let Some(entity) = inner.entities.get_mut(&mention.entity_id) {
                    entity.occurrence += 1;
                }
                new_pairs += 1;
            }
        }
        Ok(new_pairs)
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        Ok(self.inner.read().await.entities.get(&id).cloned())
    }

    async fn resolve_entity(&self, name: &str, min_ratio: f64) -> Result<Option<Entity>> {
        let inner = self.inner.read().await;
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Ok(None);
        }

        let pick_best = |ids: &BTreeSet<Uuid>| -> Option<Entity> {
            ids.iter()
                .filter_map(|id| inner.entities.get(id))
                .max_by(|a, b| a.occurrence.cmp(&b.occurrence).then(b.id.cmp(&a.id)))
                .cloned()
        };

        if let Some(ids) = inner.name_index.get(&normalized) {
            if let Some(entity) = pick_best(ids) {
                return Ok(Some(entity));
            }
        }

        // Fuzzy pass over the surface index
        let mut best: Option<(f64, Entity)> = None;
        for (surface, ids) in &inner.name_index {
            let ratio = strsim::normalized_levenshtein(&normalized, surface);
            if ratio < min_ratio {
                continue;
            }
            if let Some(entity) = pick_best(ids) {
                let better = match &best {
                    Some((best_ratio, best_entity)) => {
                        ratio > *best_ratio
                            || (ratio == *best_ratio && entity.occurrence > best_entity.occurrence)
                    }
                    None => true,
                };
                if better {
                    best = Some((ratio, entity));
                }
            }
        }
        Ok(best.map(|(_, entity)| entity))
    }

    async fn neighbors(
        &self,
        entity_id: Uuid,
        max_hops: u32,
        relation_types: Option<&[String]>,
    ) -> Result<Vec<GraphPath>> {
        let inner = self.inner.read().await;
        if !inner.entities.contains_key(&entity_id) {
            return Ok(Vec::new());
        }

        let type_allowed = |relation: &Relation| -> bool {
            relation_types.map_or(true, |types| {
                types.iter().any(|t| t == &relation.relation_type)
            })
        };

        let mut visited: HashSet<Uuid> = HashSet::from([entity_id]);
        let mut paths: Vec<GraphPath> = Vec::new();
        let mut frontier: Vec<GraphPath> = vec![GraphPath {
            entity_ids: vec![entity_id],
            relations: Vec::new(),
            hops: 0,
        }];

        for hop in 1..=max_hops {
            let mut next_frontier = Vec::new();
            for path in &frontier {
                let node = path.target();
                let Some(edges) = inner.adjacency.get(&node) else {
                    continue;
                };
                for key in edges {
                    let Some(relation) = inner.relations.get(key) else {
                        continue;
                    };
                    if !type_allowed(relation) {
                        continue;
                    }
                    let other = if key.0 == node { key.1 } else { key.0 };
                    if !visited.insert(other) {
                        continue;
                    }
                    let mut entity_ids = path.entity_ids.clone();
                    entity_ids.push(other);
                    let mut relations = path.relations.clone();
                    relations.push(relation.clone());
                    let extended = GraphPath {
                        entity_ids,
                        relations,
                        hops: hop,
                    };
                    paths.push(extended.clone());
                    next_frontier.push(extended);

                    if visited.len() >= MAX_VISITED {
                        debug!("neighbor traversal clipped at {} nodes", MAX_VISITED);
                        return Ok(paths);
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(paths)
    }

    async fn chunks_for_entities(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner
                    .mentions
                    .get(id)
                    .map(|chunks| (*id, chunks.iter().cloned().collect()))
            })
            .collect())
    }

    async fn entities_for_chunks(
        &self,
        chunk_ids: &[String],
    ) -> Result<HashMap<String, Vec<Uuid>>> {
        let inner = self.inner.read().await;
        Ok(chunk_ids
            .iter()
            .filter_map(|chunk_id| {
                inner
                    .chunk_index
                    .get(chunk_id)
                    .map(|ids| (chunk_id.clone(), ids.iter().copied().collect()))
            })
            .collect())
    }

    async fn filtered_projection(&self, filter: &GraphFilter) -> Result<GraphProjection> {
        let inner = self.inner.read().await;
        let entities: Vec<Entity> = inner.entities.values().cloned().collect();
        let relations: Vec<Relation> = inner.relations.values().cloned().collect();
        Ok(projection::project(entities, relations, filter))
    }

    async fn top_entities(
        &self,
        domain: Option<&str>,
        entity_type: Option<&str>,
        limit: usize,
        min_occurrence: u64,
    ) -> Result<Vec<Entity>> {
        let inner = self.inner.read().await;
        let mut entities: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| domain.map_or(true, |d| e.domain == d))
            .filter(|e| entity_type.map_or(true, |t| e.entity_type == t))
            .filter(|e| e.occurrence >= min_occurrence)
            .cloned()
            .collect();
        entities.sort_by(|a, b| {
            b.occurrence
                .cmp(&a.occurrence)
                .then_with(|| a.name.cmp(&b.name))
        });
        entities.truncate(limit);
        Ok(entities)
    }

    async fn top_relations(
        &self,
        domain: Option<&str>,
        relation_type: Option<&str>,
        limit: usize,
        min_weight: u64,
    ) -> Result<Vec<RelationView>> {
        let inner = self.inner.read().await;
        let mut relations: Vec<Relation> = inner
            .relations
            .values()
            .filter(|r| domain.map_or(true, |d| r.domain == d))
            .filter(|r| relation_type.map_or(true, |t| r.relation_type == t))
            .filter(|r| r.weight >= min_weight)
            .cloned()
            .collect();
        relations.sort_by(|a, b| {
            b.weight
                .cmp(&a.weight)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| a.relation_type.cmp(&b.relation_type))
        });
        relations.truncate(limit);

        let name_of = |id: Uuid| -> String {
            inner
                .entities
                .get(&id)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        Ok(relations
            .into_iter()
            .map(|relation| RelationView {
                source_name: name_of(relation.source_id),
                target_name: name_of(relation.target_id),
                relation,
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<GraphDeleteReport> {
        let mut inner = self.inner.write().await;
        let prefix = format!("{}:", document_id);
        let chunk_ids: Vec<String> = inner
            .chunk_index
            .keys()
            .filter(|id| id.starts_with(&prefix))
            .cloned()
            .collect();

        let mut report = GraphDeleteReport::default();
        let mut touched: HashSet<Uuid> = HashSet::new();

        for chunk_id in &chunk_ids {
            let Some(entity_ids) = inner.chunk_index.remove(chunk_id) else {
                continue;
            };
            for entity_id in entity_ids {
                let removed = inner
                    .mentions
                    .get_mut(&entity_id)
                    .is_some_and(|chunks| chunks.remove(chunk_id));
                if removed {
                    report.mentions_removed += 1;
                    if let Some(entity) = inner.entities.get_mut(&entity_id) {
                        entity.occurrence = entity.occurrence.saturating_sub(1);
                    }
                    touched.insert(entity_id);
                }
            }
        }

        // Garbage-collect entities whose occurrence dropped to zero
        for entity_id in touched {
            let gone = inner
                .entities
                .get(&entity_id)
                .is_some_and(|e| e.occurrence == 0);
            if gone {
                report.relations_removed += inner.unlink_entity(entity_id);
                report.entities_removed += 1;
            }
        }

        debug!(
            "graph delete for {}: {} mentions, {} entities, {} relations",
            document_id,
            report.mentions_removed,
            report.entities_removed,
            report.relations_removed
        );
        Ok(report)
    }

    async fn stats(&self, domain: Option<&str>) -> Result<GraphStats> {
        let inner = self.inner.read().await;

        let mut entity_types: BTreeMap<String, u64> = BTreeMap::new();
        let mut entity_count = 0usize;
        let mut in_domain: HashSet<Uuid> = HashSet::new();
        for entity in inner.entities.values() {
            if domain.map_or(true, |d| entity.domain == d) {
                entity_count += 1;
                in_domain.insert(entity.id);
                *entity_types.entry(entity.entity_type.clone()).or_insert(0) += 1;
            }
        }

        let mut relation_types: BTreeMap<String, u64> = BTreeMap::new();
        let mut relation_count = 0usize;
        for relation in inner.relations.values() {
            if domain.is_none()
                || (in_domain.contains(&relation.source_id)
                    && in_domain.contains(&relation.target_id))
            {
                relation_count += 1;
                *relation_types
                    .entry(relation.relation_type.clone())
                    .or_insert(0) += 1;
            }
        }

        let mention_count = inner
            .mentions
            .iter()
            .filter(|(id, _)| domain.is_none() || in_domain.contains(id))
            .map(|(_, chunks)| chunks.len())
            .sum();

        let density = if entity_count > 1 {
            relation_count as f64 / (entity_count as f64 * (entity_count as f64 - 1.0))
        } else {
            0.0
        };

        Ok(GraphStats {
            entity_count,
            relation_count,
            mention_count,
            entity_types,
            relation_types,
            density,
            domain: domain.map(str::to_string),
        })
    }

    async fn domains(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let domains: BTreeSet<String> = inner
            .entities
            .values()
            .map(|e| e.domain.clone())
            .collect();
        Ok(domains.into_iter().collect())
    }

    async fn clear(&self) -> Result<()> {
        *self.inner.write().await = GraphInner::default();
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
