//! Document chunking: structural and semantic strategies

use crate::config::ChunkingConfig;
use crate::embedder::Embedder;
use crate::error::{EngineError, Result};
use crate::extraction::ner::split_sentences;
use crate::types::Chunk;
use crate::vector::cosine_similarity;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supported ingest formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Csv,
    Json,
    Pdf,
}

impl DocumentFormat {
    /// Infer the format from a file name extension
    pub fn from_name(name: &str) -> Self {
        match name.rsplit('.').next().map(str::to_lowercase).as_deref() {
            Some("md") | Some("markdown") => Self::Markdown,
            Some("csv") => Self::Csv,
            Some("json") => Self::Json,
            Some("pdf") => Self::Pdf,
            _ => Self::PlainText,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "txt",
            Self::Markdown => "md",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Pdf => "pdf",
        }
    }
}

/// Decode raw bytes into text according to the format
pub fn extract_text(format: DocumentFormat, bytes: &[u8]) -> Result<String> {
    match format {
        DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| EngineError::InvalidInput(format!("unreadable pdf: {}", e))),
        _ => String::from_utf8(bytes.to_vec())
            .map_err(|e| EngineError::InvalidInput(format!("not valid utf-8: {}", e))),
    }
}

/// Whitespace-word based token estimate
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count() * 4 / 3
}

struct Section {
    path: Vec<String>,
    text: String,
}

/// Content chunker producing ordered, dense-ordinal chunks
pub struct ContentChunker {
    config: ChunkingConfig,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ContentChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            embedder: None,
        }
    }

    /// Enable the semantic strategy with sentence embeddings
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Split a document into chunks according to the configured strategy
    pub async fn chunk(
        &self,
        document_id: &str,
        text: &str,
        domain: &str,
        format: DocumentFormat,
    ) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidInput("empty document".to_string()));
        }

        let chunks = match format {
            DocumentFormat::Csv => self.chunk_records(document_id, text, domain, csv_records(text)),
            DocumentFormat::Json => {
                self.chunk_records(document_id, text, domain, json_records(text)?)
            }
            _ => {
                if self.config.strategy == "semantic" {
                    match self.chunk_semantic(document_id, text, domain).await {
                        Ok(chunks) => chunks,
                        Err(e) => {
                            // One notice per document, then degrade
                            warn!(
                                "semantic chunking unavailable for {} ({}), using structural",
                                document_id, e
                            );
                            self.chunk_structural(document_id, text, domain)
                        }
                    }
                } else {
                    self.chunk_structural(document_id, text, domain)
                }
            }
        };

        debug!("chunked {} into {} chunks", document_id, chunks.len());
        Ok(chunks)
    }

    fn chunk_records(
        &self,
        document_id: &str,
        _text: &str,
        domain: &str,
        records: Vec<String>,
    ) -> Vec<Chunk> {
        records
            .into_iter()
            .filter(|r| !r.trim().is_empty())
            .enumerate()
            .map(|(i, record)| Chunk::new(document_id, i as u32, record, domain))
            .collect()
    }

    /// Split on header hierarchy, then group sentences to the token budget
    /// with K sentences of overlap inside each section
    fn chunk_structural(&self, document_id: &str, text: &str, domain: &str) -> Vec<Chunk> {
        let sections = split_sections(text);
        let mut chunks = Vec::new();
        let mut ordinal = 0u32;

        for section in &sections {
            let sentences = split_sentences(&section.text);
            if sentences.is_empty() {
                continue;
            }

            let mut start = 0usize;
            while start < sentences.len() {
                let mut end = start;
                let mut tokens = 0usize;
                while end < sentences.len() {
                    let sentence_tokens = estimate_tokens(sentences[end]);
                    if end > start && tokens + sentence_tokens > self.config.token_budget {
                        break;
                    }
                    tokens += sentence_tokens;
                    end += 1;
                    if tokens >= self.config.token_budget + self.config.token_slack {
                        break;
                    }
                }

                let body = sentences[start..end].join(" ");
                chunks.push(
                    Chunk::new(document_id, ordinal, body, domain)
                        .with_section_path(section.path.clone()),
                );
                ordinal += 1;

                if end >= sentences.len() {
                    break;
                }
                // Overlap stays within the section and always leaves progress
                let consumed = end - start;
                let overlap = self.config.overlap_sentences.min(consumed - 1);
                start = end - overlap;
            }
        }

        if chunks.is_empty() {
            chunks.push(Chunk::new(
                document_id,
                0,
                text.trim().to_string(),
                domain,
            ));
        }
        chunks
    }

    /// Break when a sentence drifts from the running centroid or the budget
    /// is reached
    async fn chunk_semantic(
        &self,
        document_id: &str,
        text: &str,
        domain: &str,
    ) -> Result<Vec<Chunk>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| EngineError::Config("semantic chunking needs an embedder".into()))?;

        let sections = split_sections(text);
        let mut chunks = Vec::new();
        let mut ordinal = 0u32;

        for section in &sections {
            let sentences: Vec<String> = split_sentences(&section.text)
                .into_iter()
                .map(str::to_string)
                .collect();
            if sentences.is_empty() {
                continue;
            }

            let vectors = embedder.embed(&sentences).await?;
            let dimension = embedder.dimension();

            let mut current: Vec<&str> = Vec::new();
            let mut centroid = vec![0.0f32; dimension];
            let mut tokens = 0usize;

            for (sentence, vector) in sentences.iter().zip(vectors.iter()) {
                let distance = if current.is_empty() {
                    0.0
                } else {
                    1.0 - cosine_similarity(&centroid, vector)
                };

                let over_budget = tokens + estimate_tokens(sentence) > self.config.token_budget
                    && !current.is_empty();
                if distance > self.config.semantic_threshold || over_budget {
                    chunks.push(
                        Chunk::new(document_id, ordinal, current.join(" "), domain)
                            .with_section_path(section.path.clone()),
                    );
                    ordinal += 1;
                    current.clear();
                    centroid = vec![0.0; dimension];
                    tokens = 0;
                }

                // Running mean over the sentences in the open chunk
                let n = current.len() as f32;
                for (c, v) in centroid.iter_mut().zip(vector.iter()) {
                    *c = (*c * n + *v) / (n + 1.0);
                }
                current.push(sentence);
                tokens += estimate_tokens(sentence);
            }

            if !current.is_empty() {
                chunks.push(
                    Chunk::new(document_id, ordinal, current.join(" "), domain)
                        .with_section_path(section.path.clone()),
                );
                ordinal += 1;
            }
        }

        if chunks.is_empty() {
            chunks.push(Chunk::new(
                document_id,
                0,
                text.trim().to_string(),
                domain,
            ));
        }
        Ok(chunks)
    }
}

/// Split text on markdown-style headers, tracking the header hierarchy
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut path: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();

    let flush = |sections: &mut Vec<Section>, path: &[(usize, String)], current: &mut String| {
        if !current.trim().is_empty() {
            sections.push(Section {
                path: path.iter().map(|(_, label)| label.clone()).collect(),
                text: std::mem::take(current).trim().to_string(),
            });
        } else {
            current.clear();
        }
    };

    for line in text.lines() {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level > 0 && level <= 6 && trimmed.chars().nth(level).is_some_and(|c| c == ' ') {
            flush(&mut sections, &path, &mut current);
            let label = trimmed[level..].trim().to_string();
            path.retain(|(l, _)| *l < level);
            path.push((level, label));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    flush(&mut sections, &path, &mut current);

    if sections.is_empty() {
        sections.push(Section {
            path: Vec::new(),
            text: text.trim().to_string(),
        });
    }
    sections
}

fn csv_records(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

fn json_records(text: &str) -> Result<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| EngineError::InvalidInput(format!("invalid json: {}", e)))?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| item.to_string())
            .collect(),
        other => vec![other.to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;

    fn chunker() -> ContentChunker {
        ContentChunker::new(ChunkingConfig::default())
    }

    #[tokio::test]
    async fn test_single_sentence_document() {
        let chunks = chunker()
            .chunk("doc", "Just one sentence.", "general", DocumentFormat::PlainText)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Just one sentence.");
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let err = chunker()
            .chunk("doc", "   ", "general", DocumentFormat::PlainText)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_structural_budget_and_overlap() {
        let config = ChunkingConfig {
            token_budget: 20,
            token_slack: 5,
            overlap_sentences: 1,
            ..Default::default()
        };
        let text = (0..12)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = ContentChunker::new(config)
            .chunk("doc", &text, "general", DocumentFormat::PlainText)
            .await
            .unwrap();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as u32);
            assert!(!chunk.text.trim().is_empty());
        }
        // Overlap: consecutive chunks share a sentence
        let first_tail = split_sentences(&chunks[0].text).last().unwrap().to_string();
        assert!(chunks[1].text.starts_with(&first_tail));
    }

    #[tokio::test]
    async fn test_structural_coverage() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let chunks = chunker()
            .chunk("doc", text, "general", DocumentFormat::PlainText)
            .await
            .unwrap();
        let joined: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for sentence in split_sentences(text) {
            assert!(joined.contains(sentence));
        }
    }

    #[tokio::test]
    async fn test_markdown_sections() {
        let text = "# Intro\nSome intro text.\n\n## Details\nDetail sentence one. Detail sentence two.\n\n# Outro\nThe end.";
        let chunks = chunker()
            .chunk("doc", text, "general", DocumentFormat::Markdown)
            .await
            .unwrap();

        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].section_path, vec!["Intro".to_string()]);
        assert_eq!(
            chunks[1].section_path,
            vec!["Intro".to_string(), "Details".to_string()]
        );
        assert_eq!(chunks.last().unwrap().section_path, vec!["Outro".to_string()]);
        // Ordinals dense from 0
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as u32);
        }
    }

    #[tokio::test]
    async fn test_csv_row_per_chunk() {
        let text = "name,city\nAlice,Paris\nBob,Berlin";
        let chunks = chunker()
            .chunk("data.csv", text, "general", DocumentFormat::Csv)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, "Alice,Paris");
    }

    #[tokio::test]
    async fn test_json_array_record_per_chunk() {
        let text = r#"[{"name": "Alice"}, {"name": "Bob"}]"#;
        let chunks = chunker()
            .chunk("data.json", text, "general", DocumentFormat::Json)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("Alice"));
    }

    #[tokio::test]
    async fn test_semantic_falls_back_without_embedder() {
        let config = ChunkingConfig {
            strategy: "semantic".to_string(),
            ..Default::default()
        };
        let chunks = ContentChunker::new(config)
            .chunk("doc", "One. Two. Three.", "general", DocumentFormat::PlainText)
            .await
            .unwrap();
        assert!(!chunks.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_chunking_with_embedder() {
        let config = ChunkingConfig {
            strategy: "semantic".to_string(),
            semantic_threshold: 0.95,
            ..Default::default()
        };
        let chunker =
            ContentChunker::new(config).with_embedder(Arc::new(HashEmbedder::new(64)));
        let chunks = chunker
            .chunk(
                "doc",
                "Cats purr loudly. Cats purr loudly. Cats purr loudly.",
                "general",
                DocumentFormat::PlainText,
            )
            .await
            .unwrap();
        // Near-identical sentences stay in one chunk under a lax threshold
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(DocumentFormat::from_name("a.md"), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_name("b.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_name("notes"), DocumentFormat::PlainText);
    }
}
