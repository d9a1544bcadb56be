//! Per-chunk entity/relation extraction with bounded concurrency,
//! deadlines and retry

pub mod ner;
pub mod resolver;

pub use ner::{build_ner, EntitySpan, HttpNerClient, NerClient, RelationSpan, RuleBasedNer};
pub use resolver::EntityResolver;

use crate::config::ExtractionConfig;
use crate::types::{Chunk, Entity, Mention, Relation};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

/// Raw collaborator output for one chunk
struct ChunkSpans {
    chunk_id: String,
    ordinal: u32,
    entities: Vec<EntitySpan>,
    relations: Vec<RelationSpan>,
    failed: bool,
}

/// Merged extraction output for one document
#[derive(Debug, Default)]
pub struct DocumentExtraction {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub mentions: Vec<Mention>,
    /// Sentence-level factual statements backing the extracted edges
    pub claims: Vec<String>,
    /// Chunk ids that exhausted their retries
    pub failed_chunks: Vec<String>,
}

/// Deterministic ±25% jitter derived from the operation key
pub(crate) fn backoff_with_jitter(base_ms: u64, attempt: u32, key: &str) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    attempt.hash(&mut hasher);
    // Map the hash onto [-25%, +25%]
    let jitter_pct = (hasher.finish() % 51) as i64 - 25;
    let jittered = exp as i64 + exp as i64 * jitter_pct / 100;
    Duration::from_millis(jittered.max(1) as u64)
}

/// Extraction pipeline over the NER/relation collaborators.
///
/// Chunks of one document run with bounded concurrency; a process-wide
/// semaphore caps extraction across documents. Chunk failure is never fatal
/// to the document.
pub struct Extractor {
    ner: Arc<dyn NerClient>,
    config: ExtractionConfig,
    global_permits: Arc<Semaphore>,
}

impl Extractor {
    pub fn new(ner: Arc<dyn NerClient>, config: ExtractionConfig) -> Self {
        let global_permits = Arc::new(Semaphore::new(config.document_concurrency));
        Self {
            ner,
            config,
            global_permits,
        }
    }

    /// Extract entities and relations for every chunk of a document and
    /// merge them into a deterministic document-level view
    pub async fn extract_document(&self, chunks: &[Chunk], domain: &str) -> DocumentExtraction {
        let local_permits = Arc::new(Semaphore::new(self.config.chunk_concurrency));
        let deadline = Duration::from_secs(self.config.deadline_secs);

        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let ner = Arc::clone(&self.ner);
            let local = Arc::clone(&local_permits);
            let global = Arc::clone(&self.global_permits);
            let chunk = chunk.clone();
            let max_attempts = self.config.max_attempts;
            let backoff_base = self.config.backoff_base_ms;

            handles.push(tokio::spawn(async move {
                // Closed semaphores cannot happen here; treat as failure
                let Ok(_local) = local.acquire().await else {
                    return failed_spans(&chunk);
                };
                let Ok(_global) = global.acquire().await else {
                    return failed_spans(&chunk);
                };

                for attempt in 0..max_attempts {
                    let outcome = tokio::time::timeout(deadline, async {
                        let entities = ner.extract_entities(&chunk.text).await?;
                        let relations = ner.extract_relations(&chunk.text, &entities).await?;
                        Ok::<_, crate::error::EngineError>((entities, relations))
                    })
                    .await;

                    match outcome {
                        Ok(Ok((entities, relations))) => {
                            return ChunkSpans {
                                chunk_id: chunk.id.clone(),
                                ordinal: chunk.ordinal,
                                entities,
                                relations,
                                failed: false,
                            };
                        }
                        Ok(Err(e)) if !e.is_retryable() => {
                            warn!("extraction failed for {} (permanent): {}", chunk.id, e);
                            return failed_spans(&chunk);
                        }
                        Ok(Err(e)) => {
                            warn!(
                                "extraction attempt {} failed for {}: {}",
                                attempt + 1,
                                chunk.id,
                                e
                            );
                        }
                        Err(_) => {
                            warn!(
                                "extraction attempt {} timed out for {} after {:?}",
                                attempt + 1,
                                chunk.id,
                                deadline
                            );
                        }
                    }

                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(backoff_with_jitter(backoff_base, attempt, &chunk.id))
                            .await;
                    }
                }

                failed_spans(&chunk)
            }));
        }

        let mut spans: Vec<ChunkSpans> = Vec::with_capacity(handles.len());
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(chunk_spans) => spans.push(chunk_spans),
                Err(e) => warn!("extraction task panicked: {}", e),
            }
        }
        // Merge in ordinal order so output is independent of task timing
        spans.sort_by_key(|s| s.ordinal);

        self.merge(spans, domain)
    }

    fn merge(&self, spans: Vec<ChunkSpans>, domain: &str) -> DocumentExtraction {
        let mut resolver = EntityResolver::new(&self.config);
        let mut relations: HashMap<(Uuid, Uuid, String), Relation> = HashMap::new();
        let mut mentions: Vec<Mention> = Vec::new();
        let mut claims: Vec<String> = Vec::new();
        let mut failed_chunks: Vec<String> = Vec::new();

        for chunk_spans in spans {
            if chunk_spans.failed {
                failed_chunks.push(chunk_spans.chunk_id);
                continue;
            }

            // Dedupe observations within the chunk so occurrence counts
            // reflect chunks, not repeats inside one
            let mut seen: HashSet<(String, String)> = HashSet::new();
            let mut chunk_entities: HashMap<String, Uuid> = HashMap::new();
            for span in &chunk_spans.entities {
                let norm_key = (
                    crate::types::normalize_name(&span.text),
                    span.entity_type.to_lowercase(),
                );
                if !seen.insert(norm_key) {
                    continue;
                }
                let id = resolver.resolve(span, domain);
                chunk_entities.insert(span.text.clone(), id);
                mentions.push(Mention {
                    entity_id: id,
                    chunk_id: chunk_spans.chunk_id.clone(),
                    offset_span: span.start.map(|s| (s, s + span.text.len())),
                });
            }

            for relation_span in &chunk_spans.relations {
                let source = chunk_entities
                    .get(&relation_span.source)
                    .copied()
                    .or_else(|| resolver.lookup(&relation_span.source, "concept"));
                let target = chunk_entities
                    .get(&relation_span.target)
                    .copied()
                    .or_else(|| resolver.lookup(&relation_span.target, "concept"));
                let (Some(source_id), Some(target_id)) = (source, target) else {
                    continue;
                };
                if source_id == target_id {
                    continue;
                }

                let incoming = Relation::new(
                    source_id,
                    target_id,
                    &relation_span.relation_type,
                    &relation_span.context,
                    relation_span.confidence,
                    domain,
                );
                relations
                    .entry(incoming.key())
                    .and_modify(|existing| existing.merge(&incoming))
                    .or_insert(incoming);

                if !relation_span.context.is_empty() && !claims.contains(&relation_span.context) {
                    claims.push(relation_span.context.clone());
                }
            }
        }

        let mut relations: Vec<Relation> = relations.into_values().collect();
        relations.sort_by(|a, b| {
            a.source_id
                .cmp(&b.source_id)
                .then_with(|| a.target_id.cmp(&b.target_id))
                .then_with(|| a.relation_type.cmp(&b.relation_type))
        });

        let extraction = DocumentExtraction {
            entities: resolver.into_entities(),
            relations,
            mentions,
            claims,
            failed_chunks,
        };
        debug!(
            "document extraction: {} entities, {} relations, {} mentions, {} failed chunks",
            extraction.entities.len(),
            extraction.relations.len(),
            extraction.mentions.len(),
            extraction.failed_chunks.len()
        );
        extraction
    }
}

fn failed_spans(chunk: &Chunk) -> ChunkSpans {
    ChunkSpans {
        chunk_id: chunk.id.clone(),
        ordinal: chunk.ordinal,
        entities: Vec::new(),
        relations: Vec::new(),
        failed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollaboratorError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyNer {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl NerClient for FlakyNer {
        async fn extract_entities(&self, text: &str) -> Result<Vec<EntitySpan>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(CollaboratorError::ConnectionFailed("flaky".into()).into());
            }
            RuleBasedNer::new().extract_entities(text).await
        }

        async fn extract_relations(
            &self,
            text: &str,
            entities: &[EntitySpan],
        ) -> Result<Vec<RelationSpan>> {
            RuleBasedNer::new().extract_relations(text, entities).await
        }
    }

    fn test_config() -> ExtractionConfig {
        ExtractionConfig {
            backoff_base_ms: 1,
            ..Default::default()
        }
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new(
                "doc",
                0,
                "Alice works for Acme.".to_string(),
                "general",
            ),
            Chunk::new(
                "doc",
                1,
                "Acme is headquartered in Paris.".to_string(),
                "general",
            ),
        ]
    }

    #[tokio::test]
    async fn test_extract_document_merges_entities_across_chunks() {
        let extractor = Extractor::new(Arc::new(RuleBasedNer::new()), test_config());
        let result = extractor.extract_document(&chunks(), "general").await;

        assert!(result.failed_chunks.is_empty());
        // Acme appears in both chunks but resolves to one entity
        let acme: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.name.eq_ignore_ascii_case("acme"))
            .collect();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].occurrence, 2);

        // One mention per (entity, chunk)
        let acme_mentions = result
            .mentions
            .iter()
            .filter(|m| m.entity_id == acme[0].id)
            .count();
        assert_eq!(acme_mentions, 2);

        assert!(result
            .relations
            .iter()
            .any(|r| r.relation_type == "works_for"));
        assert!(!result.claims.is_empty());
    }

    #[tokio::test]
    async fn test_extract_document_deterministic() {
        let extractor = Extractor::new(Arc::new(RuleBasedNer::new()), test_config());
        let a = extractor.extract_document(&chunks(), "general").await;
        let b = extractor.extract_document(&chunks(), "general").await;

        let ids_a: Vec<_> = a.entities.iter().map(|e| e.id).collect();
        let ids_b: Vec<_> = b.entities.iter().map(|e| e.id).collect();
        assert_eq!(ids_a, ids_b);

        let rels_a: Vec<_> = a.relations.iter().map(Relation::key).collect();
        let rels_b: Vec<_> = b.relations.iter().map(Relation::key).collect();
        assert_eq!(rels_a, rels_b);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let ner = Arc::new(FlakyNer {
            calls: AtomicU32::new(0),
            fail_first: 1,
        });
        let extractor = Extractor::new(ner, test_config());
        let result = extractor
            .extract_document(&chunks()[..1], "general")
            .await;
        assert!(result.failed_chunks.is_empty());
        assert!(!result.entities.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_chunk_failed() {
        let ner = Arc::new(FlakyNer {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let extractor = Extractor::new(ner, test_config());
        let result = extractor
            .extract_document(&chunks()[..1], "general")
            .await;
        assert_eq!(result.failed_chunks, vec!["doc:0".to_string()]);
        assert!(result.entities.is_empty());
    }

    #[test]
    fn test_backoff_is_deterministic_and_bounded() {
        let a = backoff_with_jitter(1000, 1, "doc:0");
        let b = backoff_with_jitter(1000, 1, "doc:0");
        assert_eq!(a, b);
        // 2000ms ± 25%
        assert!(a >= Duration::from_millis(1500) && a <= Duration::from_millis(2500));
    }
}
