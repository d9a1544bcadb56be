//! Knowledge-graph store adapter and bounded projection engine

pub mod memory;
pub mod projection;

pub use memory::InMemoryGraphStore;
pub use projection::{GraphFilter, GraphProjection, ProjectionTotals, SortBy, SortOrder};

use crate::error::Result;
use crate::types::{Entity, Mention, Relation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use utoipa::ToSchema;
use uuid::Uuid;

/// A traversal path rooted at a query entity
#[derive(Debug, Clone)]
pub struct GraphPath {
    /// Ordered entity ids, starting at the root
    pub entity_ids: Vec<Uuid>,
    /// Ordered edges along the path
    pub relations: Vec<Relation>,
    /// Path length in hops
    pub hops: u32,
}

impl GraphPath {
    /// Terminal entity of the path
    pub fn target(&self) -> Uuid {
        *self.entity_ids.last().unwrap_or(&Uuid::nil())
    }
}

/// A relation together with its endpoint names, for display surfaces
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RelationView {
    #[serde(flatten)]
    pub relation: Relation,
    pub source_name: String,
    pub target_name: String,
}

/// Node/edge counts, type histograms and density
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
    pub mention_count: usize,
    pub entity_types: BTreeMap<String, u64>,
    pub relation_types: BTreeMap<String, u64>,
    /// Edges over possible directed edges; 0 for graphs of < 2 nodes
    pub density: f64,
    pub domain: Option<String>,
}

/// Outcome of removing a document's assets from the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GraphDeleteReport {
    pub mentions_removed: usize,
    pub entities_removed: usize,
    pub relations_removed: usize,
}

/// Graph store adapter: merging upserts, bounded reads, mention pivot
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge a batch of entities; idempotent for repeated observations
    async fn upsert_entities(&self, batch: Vec<Entity>) -> Result<()>;

    /// Merge a batch of relations keyed by `(source, target, type)`
    async fn upsert_relations(&self, batch: Vec<Relation>) -> Result<()>;

    /// Record entity→chunk mentions with observed-once semantics; each new
    /// pair increments the entity's occurrence exactly once. Returns the
    /// number of new pairs.
    async fn add_mentions(&self, mentions: Vec<Mention>) -> Result<usize>;

    /// Fetch one entity
    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>>;

    /// Resolve a surface form against the entity index: exact normalized
    /// match, else best fuzzy match at or above `min_ratio`
    async fn resolve_entity(&self, name: &str, min_ratio: f64) -> Result<Option<Entity>>;

    /// Paths up to `max_hops` from an entity, optionally restricted to a set
    /// of relation types
    async fn neighbors(
        &self,
        entity_id: Uuid,
        max_hops: u32,
        relation_types: Option<&[String]>,
    ) -> Result<Vec<GraphPath>>;

    /// Chunk ids mentioning each of the given entities
    async fn chunks_for_entities(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>>;

    /// Entities mentioned in each of the given chunks
    async fn entities_for_chunks(&self, chunk_ids: &[String])
        -> Result<HashMap<String, Vec<Uuid>>>;

    /// Bounded, deterministic subgraph view
    async fn filtered_projection(&self, filter: &GraphFilter) -> Result<GraphProjection>;

    /// Entities ranked by occurrence
    async fn top_entities(
        &self,
        domain: Option<&str>,
        entity_type: Option<&str>,
        limit: usize,
        min_occurrence: u64,
    ) -> Result<Vec<Entity>>;

    /// Relations ranked by weight, with endpoint names
    async fn top_relations(
        &self,
        domain: Option<&str>,
        relation_type: Option<&str>,
        limit: usize,
        min_weight: u64,
    ) -> Result<Vec<RelationView>>;

    /// Remove a document's mentions, decrement entity occurrences, and
    /// garbage-collect entities that reach zero along with their relations.
    /// Idempotent.
    async fn delete_document(&self, document_id: &str) -> Result<GraphDeleteReport>;

    /// Counts, histograms and density, optionally scoped to a domain
    async fn stats(&self, domain: Option<&str>) -> Result<GraphStats>;

    /// Distinct entity domains, sorted
    async fn domains(&self) -> Result<Vec<String>>;

    /// Remove everything; idempotent
    async fn clear(&self) -> Result<()>;

    /// Cheap readiness probe
    async fn health_check(&self) -> Result<()>;
}
