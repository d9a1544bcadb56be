//! GraphFusion: a hybrid GraphRAG retrieval and fusion engine
//!
//! Answers natural-language questions over an ingested corpus by combining
//! three retrieval modalities:
//! - Dense-vector similarity over chunk embeddings
//! - Traversal of an extracted knowledge graph
//! - Lexical BM25 keyword match
//!
//! Evidence from the strategies is fused with weighted reciprocal-rank
//! fusion into a single ranked context used to synthesize an answer.
//!
//! # Example
//!
//! ```rust,no_run
//! use graphfusion::{api::AppState, config::EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::default();
//!     let state = AppState::new(config).await?;
//!
//!     state
//!         .pipeline
//!         .ingest("notes.txt", b"Acme is headquartered in Paris.", "general", true)
//!         .await?;
//!
//!     graphfusion::api::start_server(state, "127.0.0.1", 8080).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bm25;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod planner;
pub mod reasoning;
pub mod retriever;
pub mod types;
pub mod vector;

// Re-export main types
pub use api::{create_router, start_server, AppState};
pub use cache::{CacheStats, RetrievalCache};
pub use chunker::{ContentChunker, DocumentFormat};
pub use config::EngineConfig;
pub use embedder::{Embedder, HashEmbedder, HttpEmbedder};
pub use error::{CollaboratorError, EngineError, ErrorKind, Result, StoreError};
pub use extraction::{EntityResolver, Extractor, NerClient, RuleBasedNer};
pub use graph::{GraphFilter, GraphProjection, GraphStats, GraphStore, InMemoryGraphStore};
pub use ingest::{ChunkCatalog, IngestionPipeline};
pub use llm::{DisabledLlm, HttpLlmClient, LlmClient};
pub use planner::QueryPlanner;
pub use reasoning::ReasoningEngine;
pub use retriever::{HybridRetriever, RetrievalOptions};
pub use types::{
    Chunk, Complexity, DocumentRecord, DocumentStatus, Entity, Mention, QueryIntent, QueryPlan,
    RankedChunk, ReasoningKind, ReasoningMode, ReasoningPath, Relation, ResponseStatus,
    RetrievedContext, StrategyComponent, StrategyKind,
};
pub use vector::{InMemoryVectorStore, SqliteVectorStore, VectorStore};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
