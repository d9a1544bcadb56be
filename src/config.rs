//! Configuration management for the engine

use serde::{Deserialize, Serialize};

/// Main configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Graph store adapter settings
    #[serde(default)]
    pub graph_store: GraphStoreConfig,

    /// Vector store adapter settings
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Chunking settings
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Entity/relation extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Hybrid retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Query planner settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Reasoning engine settings
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Retrieval cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Embedding collaborator settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// NER collaborator settings
    #[serde(default)]
    pub ner: NerConfig,

    /// LLM collaborator settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Log level filter (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            graph_store: GraphStoreConfig::default(),
            vector_store: VectorStoreConfig::default(),
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            retrieval: RetrievalConfig::default(),
            planner: PlannerConfig::default(),
            reasoning: ReasoningConfig::default(),
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            ner: NerConfig::default(),
            llm: LlmConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Graph store adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStoreConfig {
    /// Store implementation ("memory")
    #[serde(default = "default_memory_mode")]
    pub mode: String,

    /// Remote store URL, unused by the in-process implementation
    pub url: Option<String>,

    /// Remote store credentials
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_memory_mode() -> String {
    "memory".to_string()
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            mode: default_memory_mode(),
            url: None,
            username: None,
            password: None,
        }
    }
}

/// Vector store adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Store implementation ("memory" or "sqlite")
    #[serde(default = "default_memory_mode")]
    pub mode: String,

    /// Database URL (for SQLite)
    pub database_url: Option<String>,

    /// Embedding dimension, uniform across the collection
    #[serde(default = "default_dimension")]
    pub embedding_dimension: usize,
}

fn default_dimension() -> usize {
    384
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            mode: default_memory_mode(),
            database_url: None,
            embedding_dimension: default_dimension(),
        }
    }
}

/// Chunking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// "structural" or "semantic"
    #[serde(default = "default_chunk_strategy")]
    pub strategy: String,

    /// Soft token budget per chunk
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Allowed slack around the budget
    #[serde(default = "default_token_slack")]
    pub token_slack: usize,

    /// Sentences of overlap between consecutive chunks (1–3)
    #[serde(default = "default_overlap_sentences")]
    pub overlap_sentences: usize,

    /// Cosine-distance threshold that starts a new semantic chunk
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
}

fn default_chunk_strategy() -> String {
    "structural".to_string()
}

fn default_token_budget() -> usize {
    800
}

fn default_token_slack() -> usize {
    200
}

fn default_overlap_sentences() -> usize {
    2
}

fn default_semantic_threshold() -> f32 {
    0.35
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_chunk_strategy(),
            token_budget: default_token_budget(),
            token_slack: default_token_slack(),
            overlap_sentences: default_overlap_sentences(),
            semantic_threshold: default_semantic_threshold(),
        }
    }
}

/// Entity/relation extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Concurrent chunk extractions per document
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,

    /// Global cap on concurrent chunk extractions across documents
    #[serde(default = "default_document_concurrency")]
    pub document_concurrency: usize,

    /// Hard deadline per chunk extraction, seconds
    #[serde(default = "default_extract_deadline")]
    pub deadline_secs: u64,

    /// Retry attempts per chunk before marking extraction_failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Exponential backoff base, milliseconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Fuzzy-match ratio at or above which entities merge
    #[serde(default = "default_fuzzy_merge")]
    pub fuzzy_merge_threshold: f64,

    /// Prefix length of the blocking key for candidate lookup
    #[serde(default = "default_blocking_prefix")]
    pub blocking_prefix_len: usize,
}

fn default_chunk_concurrency() -> usize {
    8
}

fn default_document_concurrency() -> usize {
    32
}

fn default_extract_deadline() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_fuzzy_merge() -> f64 {
    0.92
}

fn default_blocking_prefix() -> usize {
    4
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_concurrency: default_chunk_concurrency(),
            document_concurrency: default_document_concurrency(),
            deadline_secs: default_extract_deadline(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            fuzzy_merge_threshold: default_fuzzy_merge(),
            blocking_prefix_len: default_blocking_prefix(),
        }
    }
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Fused chunks returned
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Vector over-fetch multiplier (k = factor × top_k)
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,

    /// Hard per-strategy deadline, milliseconds
    #[serde(default = "default_component_deadline")]
    pub component_deadline_ms: u64,

    /// Soft global deadline, milliseconds
    #[serde(default = "default_global_deadline")]
    pub global_deadline_ms: u64,

    /// Reciprocal-rank fusion constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// BM25 term-frequency saturation
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f32,

    /// BM25 length normalization
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f32,
}

fn default_top_k() -> usize {
    10
}

fn default_overfetch() -> usize {
    4
}

fn default_component_deadline() -> u64 {
    2000
}

fn default_global_deadline() -> u64 {
    3000
}

fn default_rrf_k() -> u32 {
    60
}

fn default_bm25_k1() -> f32 {
    1.2
}

fn default_bm25_b() -> f32 {
    0.75
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            overfetch_factor: default_overfetch(),
            component_deadline_ms: default_component_deadline(),
            global_deadline_ms: default_global_deadline(),
            rrf_k: default_rrf_k(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

/// Query planner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Below this rule confidence the LLM classifier is consulted
    #[serde(default = "default_rule_floor")]
    pub rule_confidence_floor: f32,

    /// Fuzzy ratio promoting a query entity to "known"
    #[serde(default = "default_known_fuzzy")]
    pub known_entity_fuzzy: f64,
}

fn default_rule_floor() -> f32 {
    0.6
}

fn default_known_fuzzy() -> f64 {
    0.9
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            rule_confidence_floor: default_rule_floor(),
            known_entity_fuzzy: default_known_fuzzy(),
        }
    }
}

/// Reasoning engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Reasoning paths returned per query
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,

    /// Beam width for multi-hop search
    #[serde(default = "default_beam_width")]
    pub beam_width: usize,

    /// Relation types traversed by causal reasoning
    #[serde(default = "default_causal_types")]
    pub causal_relation_types: Vec<String>,
}

fn default_max_paths() -> usize {
    5
}

fn default_beam_width() -> usize {
    4
}

fn default_causal_types() -> Vec<String> {
    vec![
        "causes".to_string(),
        "leads_to".to_string(),
        "results_in".to_string(),
        "contributes_to".to_string(),
    ]
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_paths: default_max_paths(),
            beam_width: default_beam_width(),
            causal_relation_types: default_causal_types(),
        }
    }
}

/// Retrieval cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cache entries
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Time-to-live for cache entries in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: i64,
}

fn default_true() -> bool {
    true
}

fn default_cache_entries() -> usize {
    1000
}

fn default_cache_ttl() -> i64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_entries(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

/// Embedding collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding service URL; None selects the deterministic local fallback
    pub url: Option<String>,

    /// Model identifier passed to the service
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_collaborator_timeout() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_embedding_model(),
            timeout_secs: default_collaborator_timeout(),
        }
    }
}

/// NER collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NerConfig {
    /// NER service URL; None selects the rule-based extractor
    pub url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_collaborator_timeout(),
        }
    }
}

/// LLM collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint URL
    pub url: Option<String>,

    /// API key (usually from environment variable)
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,

    /// Skip the LLM entirely; rule-based paths must work offline
    #[serde(default)]
    pub disable_llm_fallback: bool,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_collaborator_timeout(),
            disable_llm_fallback: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file (json, toml, yaml by extension)
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Apply `GRAPHFUSION_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("GRAPHFUSION_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_GRAPH_URL") {
            self.graph_store.url = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_VECTOR_DATABASE_URL") {
            self.vector_store.mode = "sqlite".to_string();
            self.vector_store.database_url = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_EMBEDDING_URL") {
            self.embedding.url = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_NER_URL") {
            self.ner.url = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_LLM_URL") {
            self.llm.url = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("GRAPHFUSION_DISABLE_LLM_FALLBACK") {
            self.llm.disable_llm_fallback = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.graph_store.mode.as_str(), "memory") {
            return Err(anyhow::anyhow!(
                "Unsupported graph store mode: {}",
                self.graph_store.mode
            ));
        }

        match self.vector_store.mode.as_str() {
            "memory" => {}
            "sqlite" => {
                if self.vector_store.database_url.is_none() {
                    return Err(anyhow::anyhow!("sqlite vector store requires database_url"));
                }
            }
            other => return Err(anyhow::anyhow!("Unsupported vector store mode: {}", other)),
        }

        if self.vector_store.embedding_dimension == 0 {
            return Err(anyhow::anyhow!(
                "Embedding dimension must be greater than 0"
            ));
        }

        if !matches!(self.chunking.strategy.as_str(), "structural" | "semantic") {
            return Err(anyhow::anyhow!(
                "Unknown chunking strategy: {}",
                self.chunking.strategy
            ));
        }

        if !(1..=3).contains(&self.chunking.overlap_sentences) {
            return Err(anyhow::anyhow!("overlap_sentences must be within 1–3"));
        }

        if self.extraction.chunk_concurrency == 0 || self.extraction.document_concurrency == 0 {
            return Err(anyhow::anyhow!("extraction concurrency must be positive"));
        }

        if self.retrieval.top_k == 0 {
            return Err(anyhow::anyhow!("top_k must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.planner.rule_confidence_floor) {
            return Err(anyhow::anyhow!(
                "rule_confidence_floor must be between 0.0 and 1.0"
            ));
        }

        if self.reasoning.causal_relation_types.is_empty() {
            return Err(anyhow::anyhow!("causal_relation_types cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.token_budget, 800);
        assert_eq!(config.extraction.chunk_concurrency, 8);
        assert_eq!(config.retrieval.rrf_k, 60);
        assert_eq!(config.cache.ttl_seconds, 60);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.vector_store.mode = "qdrant".to_string();
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.chunking.overlap_sentences = 7;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.reasoning.causal_relation_types.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sqlite_requires_database_url() {
        let mut config = EngineConfig::default();
        config.vector_store.mode = "sqlite".to_string();
        assert!(config.validate().is_err());

        config.vector_store.database_url = Some("sqlite::memory:".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.retrieval.top_k, config.retrieval.top_k);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n\n[retrieval]\ntop_k = 25\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retrieval.top_k, 25);
        // Unlisted sections keep their defaults
        assert_eq!(config.chunking.token_budget, 800);

        let bad = dir.path().join("engine.ini");
        std::fs::write(&bad, "nope").unwrap();
        assert!(EngineConfig::from_file(&bad).is_err());
    }
}
