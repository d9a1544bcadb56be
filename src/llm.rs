//! LLM collaborator contract and OpenAI-compatible HTTP client
//!
//! The LLM is an injected, optional collaborator: the planner and the answer
//! path must work without it.

use crate::config::LlmConfig;
use crate::error::{CollaboratorError, Result};
use crate::types::QueryIntent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// A chat message in OpenAI wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// LLM collaborator: intent classification fallback and answer synthesis
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Classify a query's intent; used only when rules are unsure
    async fn classify_intent(&self, query: &str) -> Result<QueryIntent>;

    /// Synthesize an answer from the fused context
    async fn synthesize(&self, query: &str, context: &str) -> Result<String>;

    /// Whether calls can be attempted at all
    fn is_available(&self) -> bool;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat-completions client
pub struct HttpLlmClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| CollaboratorError::Disabled("no llm url configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        debug!("chat completion via {} ({})", self.url, self.model);

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout("llm".into())
            } else {
                CollaboratorError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("llm error ({}): {}", status, body);
            return Err(match status.as_u16() {
                401 | 403 => CollaboratorError::Unauthorized,
                429 => CollaboratorError::RateLimited,
                _ => CollaboratorError::ConnectionFailed(format!("HTTP {}", status)),
            }
            .into());
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::InvalidResponse("no choices returned".into()).into())
    }
}

/// Map a free-form classifier reply onto an intent tag
fn parse_intent(reply: &str) -> Option<QueryIntent> {
    let upper = reply.to_uppercase();
    [
        ("COMPARATIVE", QueryIntent::Comparative),
        ("CAUSAL", QueryIntent::Causal),
        ("ANALYTICAL", QueryIntent::Analytical),
        ("TEMPORAL", QueryIntent::Temporal),
        ("PROCEDURAL", QueryIntent::Procedural),
        ("FACTUAL", QueryIntent::Factual),
    ]
    .into_iter()
    .find(|(tag, _)| upper.contains(tag))
    .map(|(_, intent)| intent)
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn classify_intent(&self, query: &str) -> Result<QueryIntent> {
        let messages = [
            ChatMessage::system(
                "Classify the user's question intent. Answer with exactly one of: \
                 FACTUAL, COMPARATIVE, CAUSAL, ANALYTICAL, TEMPORAL, PROCEDURAL.",
            ),
            ChatMessage::user(query.to_string()),
        ];
        let reply = self.chat(&messages, 0.0).await?;
        parse_intent(&reply).ok_or_else(|| {
            CollaboratorError::InvalidResponse(format!("unrecognized intent reply: {}", reply))
                .into()
        })
    }

    async fn synthesize(&self, query: &str, context: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(
                "Answer the question using only the provided context. \
                 Cite no sources outside it. Be concise.",
            ),
            ChatMessage::user(format!("Context:\n{}\n\nQuestion: {}", context, query)),
        ];
        self.chat(&messages, 0.2).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in when no LLM is configured or the fallback is disabled
pub struct DisabledLlm;

#[async_trait]
impl LlmClient for DisabledLlm {
    async fn classify_intent(&self, _query: &str) -> Result<QueryIntent> {
        Err(CollaboratorError::Disabled("llm".into()).into())
    }

    async fn synthesize(&self, _query: &str, _context: &str) -> Result<String> {
        Err(CollaboratorError::Disabled("llm".into()).into())
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Select the LLM client implied by configuration
pub fn build_llm(config: &LlmConfig) -> Result<std::sync::Arc<dyn LlmClient>> {
    if config.disable_llm_fallback || config.url.is_none() {
        return Ok(std::sync::Arc::new(DisabledLlm));
    }
    Ok(std::sync::Arc::new(HttpLlmClient::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intent() {
        assert_eq!(parse_intent("CAUSAL"), Some(QueryIntent::Causal));
        assert_eq!(
            parse_intent("The intent is comparative."),
            Some(QueryIntent::Comparative)
        );
        assert_eq!(parse_intent("no idea"), None);
    }

    #[tokio::test]
    async fn test_disabled_llm() {
        let llm = DisabledLlm;
        assert!(!llm.is_available());
        assert!(llm.classify_intent("why?").await.is_err());
    }

    #[tokio::test]
    async fn test_http_llm_against_stub() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "CAUSAL"}}]
            })))
            .mount(&server)
            .await;

        let config = LlmConfig {
            url: Some(server.uri()),
            ..Default::default()
        };
        let client = HttpLlmClient::new(&config).unwrap();
        let intent = client
            .classify_intent("why do engines overheat")
            .await
            .unwrap();
        assert_eq!(intent, QueryIntent::Causal);
    }

    #[tokio::test]
    async fn test_http_llm_unauthorized() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let config = LlmConfig {
            url: Some(server.uri()),
            ..Default::default()
        };
        let client = HttpLlmClient::new(&config).unwrap();
        let err = client.synthesize("q", "ctx").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermanentDependency);
    }
}
