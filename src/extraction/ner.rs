//! Entity and relation span extraction: HTTP collaborators with a
//! rule-based offline path

use crate::bm25::is_stopword;
use crate::config::NerConfig;
use crate::error::{CollaboratorError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, trace};

/// A named span detected in text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    pub entity_type: String,
    pub confidence: f32,
    pub start: Option<usize>,
}

/// A typed edge detected over entity spans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSpan {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub confidence: f32,
    /// Sentence evidencing the edge
    pub context: String,
}

/// NER + relation collaborator contract
#[async_trait]
pub trait NerClient: Send + Sync {
    async fn extract_entities(&self, text: &str) -> Result<Vec<EntitySpan>>;

    async fn extract_relations(
        &self,
        text: &str,
        entities: &[EntitySpan],
    ) -> Result<Vec<RelationSpan>>;
}

/// Capitalized words/phrases, the entity mention candidates
static ENTITY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]*(?:\s+[A-Z][a-zA-Z0-9]*)*)\b").unwrap());

/// Imperative/question leads that capitalization alone cannot rule out
static NON_ENTITY_LEADS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "compare", "describe", "explain", "list", "show", "tell", "give", "find", "summarize",
        "define", "analyze",
    ]
    .into_iter()
    .collect()
});

/// Split text into sentences on terminal punctuation
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let sentence = text[start..=idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx + c.len_utf8();
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Verb patterns mapped to relation types, strongest first
static RELATION_PATTERNS: LazyLock<Vec<(Regex, &'static str, f32)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\bis\s+headquartered\s+in\b|\bheadquarters\s+in\b").unwrap(),
            "headquartered_in",
            0.85,
        ),
        (
            Regex::new(r"(?i)\bworks?\s+(?:for|at)\b").unwrap(),
            "works_for",
            0.85,
        ),
        (
            Regex::new(r"(?i)\bis\s+(?:located|based)\s+in\b").unwrap(),
            "located_in",
            0.8,
        ),
        (Regex::new(r"(?i)\bcauses?\b").unwrap(), "causes", 0.8),
        (Regex::new(r"(?i)\bleads?\s+to\b").unwrap(), "leads_to", 0.75),
        (
            Regex::new(r"(?i)\bresults?\s+in\b").unwrap(),
            "results_in",
            0.75,
        ),
        (
            Regex::new(r"(?i)\bcontributes?\s+to\b").unwrap(),
            "contributes_to",
            0.7,
        ),
        (Regex::new(r"(?i)\bis\s+an?\b").unwrap(), "is_a", 0.6),
        (Regex::new(r"(?i)\bpart\s+of\b").unwrap(), "part_of", 0.6),
        (
            Regex::new(r"(?i)\b(?:founded|acquired)\b").unwrap(),
            "founded",
            0.6,
        ),
    ]
});

fn relation_patterns() -> &'static [(Regex, &'static str, f32)] {
    &RELATION_PATTERNS
}

/// Pattern-matching extractor, the offline path and collaborator fallback.
///
/// No coreference resolution, no disambiguation; recall over precision.
pub struct RuleBasedNer {
    min_entity_length: usize,
}

impl Default for RuleBasedNer {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedNer {
    pub const fn new() -> Self {
        Self {
            min_entity_length: 2,
        }
    }

    fn keep_candidate(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        name.len() >= self.min_entity_length
            && !is_stopword(&lowered)
            && !NON_ENTITY_LEADS.contains(lowered.as_str())
    }

    /// Infer a type tag from the span's sentence context
    fn infer_type(sentence: &str, name: &str) -> &'static str {
        let after = sentence.split(name).nth(1).unwrap_or("");
        let before = sentence.split(name).next().unwrap_or("");
        if after.trim_start().starts_with("Inc")
            || after.trim_start().starts_with("Corp")
            || name.ends_with("Inc")
            || name.ends_with("Corp")
        {
            return "organization";
        }
        if before.trim_end().ends_with(" in") || before.trim_end().ends_with(" at") {
            return "location";
        }
        if after.trim_start().starts_with("works") {
            return "person";
        }
        "concept"
    }

    fn entities_in(&self, text: &str) -> Vec<EntitySpan> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut spans = Vec::new();
        for sentence in split_sentences(text) {
            for captures in ENTITY_PATTERN.captures_iter(sentence) {
                let matched = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                if !self.keep_candidate(matched) {
                    trace!("filtered entity candidate: {}", matched);
                    continue;
                }
                if !seen.insert(matched.to_lowercase()) {
                    continue;
                }
                let offset = text.find(matched);
                spans.push(EntitySpan {
                    text: matched.to_string(),
                    entity_type: Self::infer_type(sentence, matched).to_string(),
                    confidence: 0.6,
                    start: offset,
                });
            }
        }
        spans
    }

    fn relations_in(&self, text: &str, entities: &[EntitySpan]) -> Vec<RelationSpan> {
        let mut relations = Vec::new();
        for sentence in split_sentences(text) {
            // Entities present in this sentence, in order of appearance
            let mut present: Vec<(usize, &EntitySpan)> = entities
                .iter()
                .filter_map(|e| sentence.find(e.text.as_str()).map(|pos| (pos, e)))
                .collect();
            present.sort_by_key(|(pos, _)| *pos);

            for i in 0..present.len() {
                for j in (i + 1)..present.len() {
                    let (start, source) = present[i];
                    let (end, target) = present[j];
                    if end <= start + source.text.len() {
                        // Overlapping spans ("Lung" inside "Lung Cancer")
                        continue;
                    }
                    let between = &sentence[start + source.text.len()..end];

                    let typed = relation_patterns()
                        .iter()
                        .find(|(pattern, _, _)| pattern.is_match(between));

                    let (relation_type, confidence) = match typed {
                        Some((_, t, c)) => (*t, *c),
                        // Bare co-occurrence within one sentence
                        None => ("related_to", 0.3),
                    };

                    relations.push(RelationSpan {
                        source: source.text.clone(),
                        target: target.text.clone(),
                        relation_type: relation_type.to_string(),
                        confidence,
                        context: sentence.chars().take(200).collect(),
                    });
                }
            }
        }
        relations
    }
}

#[async_trait]
impl NerClient for RuleBasedNer {
    async fn extract_entities(&self, text: &str) -> Result<Vec<EntitySpan>> {
        let spans = self.entities_in(text);
        debug!("rule-based extraction found {} entities", spans.len());
        Ok(spans)
    }

    async fn extract_relations(
        &self,
        text: &str,
        entities: &[EntitySpan],
    ) -> Result<Vec<RelationSpan>> {
        Ok(self.relations_in(text, entities))
    }
}

#[derive(Serialize)]
struct NerRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct NerResponse {
    entities: Vec<WireEntity>,
}

#[derive(Deserialize)]
struct WireEntity {
    text: String,
    label: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    start: Option<usize>,
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Serialize)]
struct RelationRequest<'a> {
    text: &'a str,
    entities: Vec<&'a str>,
}

#[derive(Deserialize)]
struct RelationResponse {
    relations: Vec<WireRelation>,
}

#[derive(Deserialize)]
struct WireRelation {
    source: String,
    target: String,
    #[serde(rename = "type")]
    relation_type: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    context: String,
}

/// HTTP NER collaborator speaking `{url}/entities` and `{url}/relations`
pub struct HttpNerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNerClient {
    pub fn new(config: &NerConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| CollaboratorError::Disabled("no ner url configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Timeout("ner".into())
                } else {
                    CollaboratorError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => CollaboratorError::Unauthorized,
                429 => CollaboratorError::RateLimited,
                _ => CollaboratorError::ConnectionFailed(format!("HTTP {}", status)),
            }
            .into());
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()).into())
    }
}

#[async_trait]
impl NerClient for HttpNerClient {
    async fn extract_entities(&self, text: &str) -> Result<Vec<EntitySpan>> {
        let response: NerResponse = self.post("entities", &NerRequest { text }).await?;
        Ok(response
            .entities
            .into_iter()
            .map(|e| EntitySpan {
                text: e.text,
                entity_type: e.label.to_lowercase(),
                confidence: e.confidence.clamp(0.0, 1.0),
                start: e.start,
            })
            .collect())
    }

    async fn extract_relations(
        &self,
        text: &str,
        entities: &[EntitySpan],
    ) -> Result<Vec<RelationSpan>> {
        let request = RelationRequest {
            text,
            entities: entities.iter().map(|e| e.text.as_str()).collect(),
        };
        let response: RelationResponse = self.post("relations", &request).await?;
        Ok(response
            .relations
            .into_iter()
            .map(|r| RelationSpan {
                source: r.source,
                target: r.target,
                relation_type: r.relation_type.to_lowercase(),
                confidence: r.confidence.clamp(0.0, 1.0),
                context: r.context,
            })
            .collect())
    }
}

/// Select the NER client implied by configuration
pub fn build_ner(config: &NerConfig) -> Result<std::sync::Arc<dyn NerClient>> {
    match &config.url {
        Some(_) => Ok(std::sync::Arc::new(HttpNerClient::new(config)?)),
        None => Ok(std::sync::Arc::new(RuleBasedNer::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_based_entities() {
        let ner = RuleBasedNer::new();
        let spans = ner
            .extract_entities("Alice works for Acme. Acme is headquartered in Paris.")
            .await
            .unwrap();
        let names: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert!(names.contains(&"Alice"));
        assert!(names.contains(&"Acme"));
        assert!(names.contains(&"Paris"));
    }

    #[tokio::test]
    async fn test_rule_based_question_words_filtered() {
        let ner = RuleBasedNer::new();
        let spans = ner
            .extract_entities("Where is Acme located?")
            .await
            .unwrap();
        let names: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(names, vec!["Acme"]);
    }

    #[tokio::test]
    async fn test_rule_based_relations() {
        let ner = RuleBasedNer::new();
        let text = "Alice works for Acme. Acme is headquartered in Paris.";
        let entities = ner.extract_entities(text).await.unwrap();
        let relations = ner.extract_relations(text, &entities).await.unwrap();

        assert!(relations
            .iter()
            .any(|r| r.source == "Alice" && r.target == "Acme" && r.relation_type == "works_for"));
        assert!(relations.iter().any(|r| {
            r.source == "Acme" && r.target == "Paris" && r.relation_type == "headquartered_in"
        }));
    }

    #[tokio::test]
    async fn test_rule_based_causal_relation() {
        let ner = RuleBasedNer::new();
        let text = "Smoking causes Lung Cancer.";
        let entities = ner.extract_entities(text).await.unwrap();
        let relations = ner.extract_relations(text, &entities).await.unwrap();
        assert!(relations.iter().any(|r| r.relation_type == "causes"));
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[tokio::test]
    async fn test_http_ner_against_stub() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/entities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "entities": [{"text": "Acme", "label": "ORG", "confidence": 0.97, "start": 0}]
            })))
            .mount(&server)
            .await;

        let config = NerConfig {
            url: Some(server.uri()),
            ..Default::default()
        };
        let client = HttpNerClient::new(&config).unwrap();
        let spans = client.extract_entities("Acme ships anvils").await.unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, "org");
    }
}
