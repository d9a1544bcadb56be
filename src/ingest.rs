//! Ingestion pipeline: chunk, extract, embed, dual-write, delete

use crate::bm25::KeywordIndex;
use crate::chunker::{extract_text, ContentChunker, DocumentFormat};
use crate::embedder::Embedder;
use crate::error::{EngineError, Result};
use crate::extraction::{backoff_with_jitter, Extractor};
use crate::graph::GraphStore;
use crate::types::{Chunk, DocumentRecord, DocumentStatus};
use crate::vector::{VectorPayload, VectorPoint, VectorStore};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Read surface over ingested chunk content.
///
/// Written only by the ingestion pipeline; the retriever resolves fused
/// chunk ids back to text through it.
pub struct ChunkCatalog {
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl ChunkCatalog {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, chunks: &[Chunk]) {
        let mut map = self.chunks.write().await;
        for chunk in chunks {
            map.insert(chunk.id.clone(), chunk.clone());
        }
    }

    pub async fn get(&self, chunk_id: &str) -> Option<Chunk> {
        self.chunks.read().await.get(chunk_id).cloned()
    }

    pub async fn get_many(&self, chunk_ids: &[String]) -> Vec<Chunk> {
        let map = self.chunks.read().await;
        chunk_ids
            .iter()
            .filter_map(|id| map.get(id).cloned())
            .collect()
    }

    pub async fn remove_document(&self, document_id: &str) -> usize {
        let prefix = format!("{}:", document_id);
        let mut map = self.chunks.write().await;
        let before = map.len();
        map.retain(|id, _| !id.starts_with(&prefix));
        before - map.len()
    }

    pub async fn clear(&self) {
        self.chunks.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }
}

impl Default for ChunkCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Corpus-level listing returned by the documents endpoint
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct DocumentListing {
    pub documents: Vec<DocumentRecord>,
    pub total_documents: usize,
    pub vector_store_documents: usize,
    pub knowledge_graph_documents: usize,
}

/// Ingestion pipeline owning all writes to the stores.
///
/// Extraction and embedding failures degrade a document to `partial`;
/// store writes are retried before giving up.
pub struct IngestionPipeline {
    chunker: ContentChunker,
    extractor: Extractor,
    embedder: Arc<dyn Embedder>,
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    keyword: Arc<RwLock<KeywordIndex>>,
    catalog: Arc<ChunkCatalog>,
    registry: RwLock<BTreeMap<String, DocumentRecord>>,
    /// Monotonic counter bumped on every mutation; read by the retrieval cache
    generation: AtomicU64,
    retry_attempts: u32,
    retry_base_ms: u64,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunker: ContentChunker,
        extractor: Extractor,
        embedder: Arc<dyn Embedder>,
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        keyword: Arc<RwLock<KeywordIndex>>,
        catalog: Arc<ChunkCatalog>,
        retry_attempts: u32,
        retry_base_ms: u64,
    ) -> Self {
        Self {
            chunker,
            extractor,
            embedder,
            graph,
            vector,
            keyword,
            catalog,
            registry: RwLock::new(BTreeMap::new()),
            generation: AtomicU64::new(0),
            retry_attempts,
            retry_base_ms,
        }
    }

    /// Current store generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn retry_store<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error: Option<EngineError> = None;
        for attempt in 0..self.retry_attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("{} attempt {} failed: {}", operation, attempt + 1, e);
                    last_error = Some(e);
                    if attempt + 1 < self.retry_attempts {
                        tokio::time::sleep(backoff_with_jitter(
                            self.retry_base_ms,
                            attempt,
                            operation,
                        ))
                        .await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| EngineError::Generic(anyhow::anyhow!("{} failed", operation))))
    }

    /// Ingest one document end to end. Returns the final registry record;
    /// chunk-level failures surface as `partial`, not as an error.
    pub async fn ingest(
        &self,
        name: &str,
        bytes: &[u8],
        domain: &str,
        build_knowledge_graph: bool,
    ) -> Result<DocumentRecord> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidInput("empty document name".to_string()));
        }

        // Re-ingesting a known document replaces its assets
        if self.registry.read().await.contains_key(name) {
            info!("re-ingesting {}, removing previous assets", name);
            self.delete_document(name).await?;
        }

        let format = DocumentFormat::from_name(name);
        let text = extract_text(format, bytes)?;

        let mut record = DocumentRecord {
            name: name.to_string(),
            domain: domain.to_string(),
            status: DocumentStatus::Received,
            chunk_count: 0,
            entity_count: 0,
            relation_count: 0,
            failed_chunks: 0,
            ingested_at: Utc::now(),
            reason: None,
        };
        self.registry
            .write()
            .await
            .insert(name.to_string(), record.clone());

        let chunks = match self.chunker.chunk(name, &text, domain, format).await {
            Ok(chunks) => chunks,
            Err(e) => {
                self.registry.write().await.remove(name);
                return Err(e);
            }
        };
        record.status = DocumentStatus::Chunked;
        record.chunk_count = chunks.len();
        self.registry
            .write()
            .await
            .insert(name.to_string(), record.clone());

        // Extraction and embedding run concurrently
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedder = Arc::clone(&self.embedder);
        let embed_future = self.retry_store("embed chunks", move || {
            let embedder = Arc::clone(&embedder);
            let texts = texts.clone();
            async move { embedder.embed(&texts).await }
        });
        let extract_future = async {
            if build_knowledge_graph {
                Some(self.extractor.extract_document(&chunks, domain).await)
            } else {
                None
            }
        };
        let (embedded, extracted) = tokio::join!(embed_future, extract_future);

        let mut degraded: Vec<String> = Vec::new();

        match embedded {
            Ok(vectors) => {
                let points: Vec<VectorPoint> = chunks
                    .iter()
                    .zip(vectors.into_iter())
                    .map(|(chunk, vector)| VectorPoint {
                        chunk_id: chunk.id.clone(),
                        vector,
                        payload: VectorPayload {
                            document_id: chunk.document_id.clone(),
                            domain: chunk.domain.clone(),
                            ordinal: chunk.ordinal,
                            section_path: chunk.section_path.clone(),
                        },
                    })
                    .collect();
                let vector = Arc::clone(&self.vector);
                if let Err(e) = self
                    .retry_store("vector upsert", move || {
                        let vector = Arc::clone(&vector);
                        let points = points.clone();
                        async move { vector.upsert(points).await }
                    })
                    .await
                {
                    degraded.push(format!("vector store write failed: {}", e));
                }
            }
            Err(e) => degraded.push(format!("embedding failed: {}", e)),
        }

        if let Some(extraction) = extracted {
            record.entity_count = extraction.entities.len();
            record.relation_count = extraction.relations.len();
            record.failed_chunks = extraction.failed_chunks.len();
            if !extraction.failed_chunks.is_empty() {
                degraded.push(format!(
                    "{} chunks failed extraction",
                    extraction.failed_chunks.len()
                ));
            }

            let entities = extraction.entities;
            let relations = extraction.relations;
            let mentions = extraction.mentions;
            let graph_write = async {
                let graph = Arc::clone(&self.graph);
                self.retry_store("graph entity upsert", move || {
                    let graph = Arc::clone(&graph);
                    let batch = entities.clone();
                    async move { graph.upsert_entities(batch).await }
                })
                .await?;
                let graph = Arc::clone(&self.graph);
                self.retry_store("graph relation upsert", move || {
                    let graph = Arc::clone(&graph);
                    let batch = relations.clone();
                    async move { graph.upsert_relations(batch).await }
                })
                .await?;
                let graph = Arc::clone(&self.graph);
                self.retry_store("graph mention upsert", move || {
                    let graph = Arc::clone(&graph);
                    let batch = mentions.clone();
                    async move { graph.add_mentions(batch).await }
                })
                .await?;
                Ok::<(), EngineError>(())
            };
            if let Err(e) = graph_write.await {
                degraded.push(format!("graph store write failed: {}", e));
            }
        }

        // Keyword index and catalog updates are in-process and cannot fail
        {
            let mut index = self.keyword.write().await;
            for chunk in &chunks {
                index.index_chunk(chunk);
            }
        }
        self.catalog.insert(&chunks).await;

        record.status = if degraded.is_empty() {
            DocumentStatus::Indexed
        } else {
            DocumentStatus::Partial
        };
        record.reason = if degraded.is_empty() {
            None
        } else {
            Some(degraded.join("; "))
        };

        self.registry
            .write()
            .await
            .insert(name.to_string(), record.clone());
        self.bump_generation();

        info!(
            "ingested {} ({}): {} chunks, {} entities, {} relations",
            name, record.status, record.chunk_count, record.entity_count, record.relation_count
        );
        Ok(record)
    }

    /// Remove a document and all its assets. Idempotent; returns whether the
    /// document was known.
    pub async fn delete_document(&self, name: &str) -> Result<bool> {
        let existed = {
            let mut registry = self.registry.write().await;
            match registry.get_mut(name) {
                Some(record) => {
                    record.status = DocumentStatus::Deleting;
                    true
                }
                None => false,
            }
        };

        // Store-level deletes run regardless so retries converge
        let graph = Arc::clone(&self.graph);
        let doc = name.to_string();
        self.retry_store("graph delete", move || {
            let graph = Arc::clone(&graph);
            let doc = doc.clone();
            async move { graph.delete_document(&doc).await }
        })
        .await?;
        let vector = Arc::clone(&self.vector);
        let doc = name.to_string();
        self.retry_store("vector delete", move || {
            let vector = Arc::clone(&vector);
            let doc = doc.clone();
            async move { vector.delete_by_document(&doc).await }
        })
        .await?;
        self.keyword.write().await.remove_document(name);
        self.catalog.remove_document(name).await;

        self.registry.write().await.remove(name);
        self.bump_generation();
        if existed {
            info!("deleted document {}", name);
        }
        Ok(existed)
    }

    /// Wipe every store. Idempotent.
    pub async fn clear_all(&self) -> Result<()> {
        let graph = Arc::clone(&self.graph);
        self.retry_store("graph clear", move || {
            let graph = Arc::clone(&graph);
            async move { graph.clear().await }
        })
        .await?;
        let vector = Arc::clone(&self.vector);
        self.retry_store("vector clear", move || {
            let vector = Arc::clone(&vector);
            async move { vector.clear().await }
        })
        .await?;
        self.keyword.write().await.clear();
        self.catalog.clear().await;
        self.registry.write().await.clear();
        self.bump_generation();
        info!("cleared all stores");
        Ok(())
    }

    /// Documents with corpus-level counts
    pub async fn list_documents(&self) -> Result<DocumentListing> {
        let documents: Vec<DocumentRecord> =
            self.registry.read().await.values().cloned().collect();
        let vector_store_documents = self.vector.stats().await?.documents;
        let knowledge_graph_documents = documents.iter().filter(|d| d.entity_count > 0).count();
        Ok(DocumentListing {
            total_documents: documents.len(),
            vector_store_documents,
            knowledge_graph_documents,
            documents,
        })
    }

    /// Look up one registry record
    pub async fn document(&self, name: &str) -> Option<DocumentRecord> {
        self.registry.read().await.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, ExtractionConfig};
    use crate::embedder::HashEmbedder;
    use crate::extraction::RuleBasedNer;
    use crate::graph::InMemoryGraphStore;
    use crate::vector::InMemoryVectorStore;

    fn pipeline() -> (IngestionPipeline, Arc<dyn GraphStore>, Arc<dyn VectorStore>) {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let vector: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(64));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let keyword = Arc::new(RwLock::new(KeywordIndex::new(1.2, 0.75)));
        let catalog = Arc::new(ChunkCatalog::new());
        let extractor = Extractor::new(
            Arc::new(RuleBasedNer::new()),
            ExtractionConfig {
                backoff_base_ms: 1,
                ..Default::default()
            },
        );
        let pipeline = IngestionPipeline::new(
            ContentChunker::new(ChunkingConfig::default()),
            extractor,
            embedder,
            Arc::clone(&graph),
            Arc::clone(&vector),
            keyword,
            catalog,
            3,
            1,
        );
        (pipeline, graph, vector)
    }

    const DOC: &str = "Alice works for Acme. Acme is headquartered in Paris.";

    #[tokio::test]
    async fn test_ingest_document_end_to_end() {
        let (pipeline, graph, vector) = pipeline();
        let record = pipeline
            .ingest("report.txt", DOC.as_bytes(), "general", true)
            .await
            .unwrap();

        assert_eq!(record.status, DocumentStatus::Indexed);
        assert!(record.chunk_count >= 1);
        assert!(record.entity_count >= 3);
        assert!(record.relation_count >= 2);

        assert!(vector.count().await.unwrap() >= 1);
        let stats = graph.stats(None).await.unwrap();
        assert!(stats.entity_count >= 3);
        assert_eq!(pipeline.generation(), 1);
    }

    #[tokio::test]
    async fn test_ingest_without_knowledge_graph() {
        let (pipeline, graph, vector) = pipeline();
        let record = pipeline
            .ingest("plain.txt", DOC.as_bytes(), "general", false)
            .await
            .unwrap();

        assert_eq!(record.status, DocumentStatus::Indexed);
        assert_eq!(record.entity_count, 0);
        assert_eq!(graph.stats(None).await.unwrap().entity_count, 0);
        assert!(vector.count().await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_delete_round_trip_restores_stats() {
        let (pipeline, graph, vector) = pipeline();
        let before = graph.stats(None).await.unwrap();

        pipeline
            .ingest("report.txt", DOC.as_bytes(), "general", true)
            .await
            .unwrap();
        assert!(pipeline.delete_document("report.txt").await.unwrap());

        let after = graph.stats(None).await.unwrap();
        assert_eq!(before.entity_count, after.entity_count);
        assert_eq!(before.relation_count, after.relation_count);
        assert_eq!(before.mention_count, after.mention_count);
        assert_eq!(vector.count().await.unwrap(), 0);
        assert_eq!(pipeline.catalog.len().await, 0);

        // Second delete is a no-op
        assert!(!pipeline.delete_document("report.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_reingest_replaces_assets() {
        let (pipeline, graph, _) = pipeline();
        pipeline
            .ingest("report.txt", DOC.as_bytes(), "general", true)
            .await
            .unwrap();
        pipeline
            .ingest("report.txt", DOC.as_bytes(), "general", true)
            .await
            .unwrap();

        // Occurrences must not double across re-ingest
        let acme = graph
            .resolve_entity("Acme", 0.95)
            .await
            .unwrap()
            .expect("acme indexed");
        assert_eq!(acme.occurrence, 1);

        let listing = pipeline.list_documents().await.unwrap();
        assert_eq!(listing.total_documents, 1);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (pipeline, graph, vector) = pipeline();
        pipeline
            .ingest("report.txt", DOC.as_bytes(), "general", true)
            .await
            .unwrap();
        pipeline.clear_all().await.unwrap();

        assert_eq!(graph.stats(None).await.unwrap().entity_count, 0);
        assert_eq!(vector.count().await.unwrap(), 0);
        assert_eq!(pipeline.list_documents().await.unwrap().total_documents, 0);
        assert_eq!(pipeline.generation(), 2);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let (pipeline, _, _) = pipeline();
        let err = pipeline
            .ingest("  ", DOC.as_bytes(), "general", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }
}
