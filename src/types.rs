//! Core data model: chunks, entities, relations, mentions, plans, paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use utoipa::ToSchema;
use uuid::Uuid;

/// Namespace for deterministic (v5) entity ids
const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x8f1c_36a4_59d2_4b7e_a1c0_53e9_77fd_2b10);

/// Normalize an entity name: lowercase, fold whitespace, strip punctuation
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic entity id from `(normalized_name, type)`
pub fn entity_id(name: &str, entity_type: &str) -> Uuid {
    let key = format!("{}\u{1f}{}", normalize_name(name), entity_type.to_lowercase());
    Uuid::new_v5(&ENTITY_NAMESPACE, key.as_bytes())
}

/// A contiguous text unit emitted by the chunker, the atomic retrieval target
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Chunk {
    /// Stable per-document-per-index id (`{document_id}:{ordinal}`)
    pub id: String,
    pub document_id: String,
    /// 0-based, dense within a document
    pub ordinal: u32,
    pub text: String,
    /// Ordered header labels enclosing this chunk
    pub section_path: Vec<String>,
    pub page: Option<u32>,
    /// Coarse scope tag (e.g. `general`, `automotive`)
    pub domain: String,
    /// Small scalar metadata
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Chunk {
    pub fn new(document_id: &str, ordinal: u32, text: String, domain: &str) -> Self {
        Self {
            id: format!("{}:{}", document_id, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text,
            section_path: Vec::new(),
            page: None,
            domain: domain.to_string(),
            extra: HashMap::new(),
        }
    }

    pub fn with_section_path(mut self, path: Vec<String>) -> Self {
        self.section_path = path;
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// A canonical named concept extracted from chunks
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Entity {
    /// Deterministic function of `(normalized_name, type)`
    pub id: Uuid,
    /// Canonical surface form
    pub name: String,
    /// Open-vocabulary type tag (lowercase)
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    /// Alternate surface forms observed for this entity
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    pub domain: String,
    /// Count of observed mentions across the corpus, always >= 1
    pub occurrence: u64,
    /// Aggregated extraction confidence in [0, 1]
    pub confidence: f32,
}

impl Entity {
    pub fn new(name: &str, entity_type: &str, domain: &str, confidence: f32) -> Self {
        let entity_type = entity_type.to_lowercase();
        Self {
            id: entity_id(name, &entity_type),
            name: name.to_string(),
            entity_type,
            description: String::new(),
            aliases: BTreeSet::new(),
            domain: domain.to_string(),
            occurrence: 1,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Merge another observation of the same entity: union aliases, sum
    /// occurrences, keep the max confidence
    pub fn merge(&mut self, other: &Entity) {
        self.occurrence += other.occurrence;
        self.confidence = self.confidence.max(other.confidence);
        if other.name != self.name {
            self.aliases.insert(other.name.clone());
        }
        self.aliases.extend(other.aliases.iter().cloned());
        if self.description.is_empty() && !other.description.is_empty() {
            self.description = other.description.clone();
        }
    }
}

/// Cap on evidence snippets accumulated per relation
pub const RELATION_EVIDENCE_CAP: usize = 5;

/// A typed, directed edge between two entities with accumulated weight
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Relation {
    pub source_id: Uuid,
    pub target_id: Uuid,
    /// Type tag (lowercase), e.g. `works_for`, `causes`
    pub relation_type: String,
    /// Short text evidencing the edge
    pub context: String,
    /// Max observed extraction confidence in [0, 1]
    pub confidence: f32,
    /// Accumulated co-occurrence count
    pub weight: u64,
    pub domain: String,
    /// Additional evidence snippets, capped at [`RELATION_EVIDENCE_CAP`]
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl Relation {
    pub fn new(
        source_id: Uuid,
        target_id: Uuid,
        relation_type: &str,
        context: &str,
        confidence: f32,
        domain: &str,
    ) -> Self {
        Self {
            source_id,
            target_id,
            relation_type: relation_type.to_lowercase(),
            context: context.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            weight: 1,
            domain: domain.to_string(),
            evidence: Vec::new(),
        }
    }

    /// Merge key: `(source, target, type)` has at most one edge
    pub fn key(&self) -> (Uuid, Uuid, String) {
        (self.source_id, self.target_id, self.relation_type.clone())
    }

    /// Merge a duplicate observation: increment weight, append evidence up
    /// to the cap, keep the max confidence
    pub fn merge(&mut self, other: &Relation) {
        self.weight += other.weight;
        self.confidence = self.confidence.max(other.confidence);
        if !other.context.is_empty()
            && other.context != self.context
            && self.evidence.len() < RELATION_EVIDENCE_CAP
            && !self.evidence.contains(&other.context)
        {
            self.evidence.push(other.context.clone());
        }
    }
}

/// An occurrence link from an entity to a chunk, used for graph→chunk pivot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub entity_id: Uuid,
    pub chunk_id: String,
    pub offset_span: Option<(usize, usize)>,
}

/// Lifecycle state of an ingested document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Received,
    Chunked,
    Indexed,
    /// Some chunks failed extraction or indexing; still queryable
    Partial,
    Deleting,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Received => "received",
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Partial => "partial",
            DocumentStatus::Deleting => "deleting",
        };
        write!(f, "{}", s)
    }
}

/// Registry entry for an ingested document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DocumentRecord {
    pub name: String,
    pub domain: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub entity_count: usize,
    pub relation_count: usize,
    pub failed_chunks: usize,
    pub ingested_at: DateTime<Utc>,
    /// Human-readable reason when status is `partial`
    pub reason: Option<String>,
}

/// Query intent classes recognized by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryIntent {
    Factual,
    Comparative,
    Causal,
    Analytical,
    Temporal,
    Procedural,
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryIntent::Factual => "FACTUAL",
            QueryIntent::Comparative => "COMPARATIVE",
            QueryIntent::Causal => "CAUSAL",
            QueryIntent::Analytical => "ANALYTICAL",
            QueryIntent::Temporal => "TEMPORAL",
            QueryIntent::Procedural => "PROCEDURAL",
        };
        write!(f, "{}", s)
    }
}

/// Query complexity, drives `max_hops`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Retrieval strategy families executed by the hybrid retriever
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Vector,
    Graph,
    Keyword,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyKind::Vector => "vector",
            StrategyKind::Graph => "graph",
            StrategyKind::Keyword => "keyword",
        };
        write!(f, "{}", s)
    }
}

/// A strategy with its fusion weight; weights in a plan sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StrategyComponent {
    pub kind: StrategyKind,
    pub weight: f32,
}

/// Reasoning requested alongside retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    None,
    Causal,
    Comparative,
    MultiHop,
}

/// A query entity recognized by the planner
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryEntity {
    pub name: String,
    /// Set when the entity resolved against the knowledge graph
    pub entity_id: Option<Uuid>,
}

impl QueryEntity {
    pub fn is_known(&self) -> bool {
        self.entity_id.is_some()
    }
}

/// The planner's decision object
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryPlan {
    pub intent: QueryIntent,
    pub complexity: Complexity,
    pub entities: Vec<QueryEntity>,
    /// Ordered components with weights summing to 1
    pub components: Vec<StrategyComponent>,
    pub reasoning: ReasoningMode,
    /// Traversal depth bound, 1–4
    pub max_hops: u32,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
}

impl QueryPlan {
    /// Known (graph-resolved) entity ids in plan order
    pub fn known_entity_ids(&self) -> Vec<Uuid> {
        self.entities.iter().filter_map(|e| e.entity_id).collect()
    }

    /// Stable hash over the plan's retrieval-relevant fields, for caching
    pub fn cache_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.intent.to_string().hash(&mut hasher);
        for c in &self.components {
            c.kind.to_string().hash(&mut hasher);
            ((c.weight * 1000.0) as u32).hash(&mut hasher);
        }
        self.max_hops.hash(&mut hasher);
        for e in &self.entities {
            e.name.hash(&mut hasher);
            e.entity_id.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Kind of reasoning path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningKind {
    Direct,
    Causal,
    Comparative,
    MultiHop,
}

/// A path over the knowledge graph with accumulated confidence
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReasoningPath {
    pub kind: ReasoningKind,
    /// Ordered entity names along the path
    pub entities: Vec<String>,
    /// Ordered relations along the path
    pub edges: Vec<Relation>,
    /// Chunk ids evidencing the path
    pub evidence_chunks: Vec<String>,
    pub confidence: f32,
}

/// One fused retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RankedChunk {
    pub chunk: Chunk,
    /// Weighted reciprocal-rank fusion score
    pub score: f32,
    /// Strategies that surfaced this chunk
    pub strategies: Vec<StrategyKind>,
    /// Best per-strategy normalized score
    pub best_normalized: f32,
}

/// Fused output of the hybrid retriever
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetrievedContext {
    pub chunks: Vec<RankedChunk>,
    /// Entities that led to chunks via the graph strategy
    pub entities: Vec<Entity>,
    pub paths: Vec<ReasoningPath>,
    /// Strategies that timed out or failed
    pub degraded_strategies: Vec<StrategyKind>,
    /// True when at least one strategy was lost
    pub partial: bool,
    /// Plan confidence discounted by lost strategy weight
    pub confidence: f32,
}

impl RetrievedContext {
    pub fn empty(confidence: f32) -> Self {
        Self {
            chunks: Vec::new(),
            entities: Vec::new(),
            paths: Vec::new(),
            degraded_strategies: Vec::new(),
            partial: false,
            confidence,
        }
    }
}

/// Outcome marker carried by every API response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Partial,
    Error,
}
