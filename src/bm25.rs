//! BM25 keyword scoring over the chunk index
//!
//! BM25 score for chunk D and query Q:
//!
//! ```text
//! score(D, Q) = Σ IDF(qi) · (f(qi, D) · (k1 + 1)) / (f(qi, D) + k1 · (1 - b + b · |D| / avgdl))
//! ```

use crate::types::Chunk;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Common English stopwords excluded from keyword scoring
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did",
        "do", "does", "for", "from", "had", "has", "have", "he", "her", "his", "how", "i", "if",
        "in", "into", "is", "it", "its", "just", "me", "my", "no", "not", "of", "on", "or",
        "our", "she", "should", "so", "than", "that", "the", "their", "them", "then", "there",
        "these", "they", "this", "those", "to", "up", "was", "we", "were", "what", "when",
        "where", "which", "while", "who", "why", "will", "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Check membership in the stopword list
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Tokenize text for BM25: lowercase, split on whitespace/punctuation,
/// drop stopwords and empties
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|token| !token.is_empty() && !is_stopword(token))
        .map(str::to_string)
        .collect()
}

struct DocEntry {
    document_id: String,
    domain: String,
    term_counts: HashMap<String, u32>,
    len: usize,
}

/// In-process inverted index with BM25 ranking
///
/// Written only by the ingestion pipeline, read by the keyword strategy.
pub struct KeywordIndex {
    k1: f32,
    b: f32,
    docs: HashMap<String, DocEntry>,
}

impl KeywordIndex {
    pub fn new(k1: f32, b: f32) -> Self {
        Self {
            k1,
            b,
            docs: HashMap::new(),
        }
    }

    /// Index one chunk; replaces any previous entry for the same chunk id
    pub fn index_chunk(&mut self, chunk: &Chunk) {
        let tokens = tokenize(&chunk.text);
        let len = tokens.len();
        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *term_counts.entry(token).or_insert(0) += 1;
        }
        self.docs.insert(
            chunk.id.clone(),
            DocEntry {
                document_id: chunk.document_id.clone(),
                domain: chunk.domain.clone(),
                term_counts,
                len,
            },
        );
    }

    /// Drop all chunks of a document; returns how many were removed
    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.docs.len();
        self.docs.retain(|_, d| d.document_id != document_id);
        before - self.docs.len()
    }

    pub fn clear(&mut self) {
        self.docs.clear();
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Rank chunks for a query, best first. Ties break on chunk id.
    pub fn search(&self, query: &str, limit: usize, domain: Option<&str>) -> Vec<(String, f32)> {
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<(&String, &DocEntry)> = self
            .docs
            .iter()
            .filter(|(_, d)| domain.map_or(true, |dom| d.domain == dom))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let n = candidates.len() as f32;
        let avgdl =
            candidates.iter().map(|(_, d)| d.len as f32).sum::<f32>() / n;

        // IDF(t) = ln(1 + (N - df + 0.5) / (df + 0.5))
        let mut idf: HashMap<&str, f32> = HashMap::new();
        for term in &terms {
            let df = candidates
                .iter()
                .filter(|(_, d)| d.term_counts.contains_key(term))
                .count() as f32;
            idf.insert(term, ((n - df + 0.5) / (df + 0.5)).ln_1p());
        }

        let mut scored: Vec<(String, f32)> = candidates
            .iter()
            .filter_map(|(chunk_id, doc)| {
                let mut score = 0.0f32;
                for term in &terms {
                    let tf = doc.term_counts.get(term).copied().unwrap_or(0) as f32;
                    if tf == 0.0 {
                        continue;
                    }
                    let norm = self.k1 * (1.0 - self.b + self.b * doc.len as f32 / avgdl.max(1.0));
                    score += idf[term.as_str()] * (tf * (self.k1 + 1.0)) / (tf + norm);
                }
                if score > 0.0 {
                    Some(((*chunk_id).clone(), score))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }
}
