//! Embedding client for OpenAI-compatible `/embeddings` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::error::PipelineError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_DIMENSIONS: usize = 1536;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Requested vector length. Only sent when set, since not every model or
    /// compatible server accepts the parameter.
    pub dimensions: Option<usize>,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    requested_dimensions: Option<usize>,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                PipelineError::Configuration(
                    "missing embedding API key; export OPENAI_API_KEY or pass --openai-api-key"
                        .to_string(),
                )
            })?;
        if config.model.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "missing embedding model name; pass --embedding-model".to_string(),
            ));
        }
        if config.dimensions == Some(0) {
            return Err(PipelineError::Configuration(
                "embedding dimensions must be positive; pass --embedding-dimensions".to_string(),
            ));
        }

        let base = Url::parse(&config.base_url)?;
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            PipelineError::Configuration("embedding API key contains invalid characters".to_string())
        })?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                PipelineError::Configuration(format!("failed to build embedding http client: {error}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base.as_str().trim_end_matches('/')),
            model: config.model,
            dimensions: config.dimensions.unwrap_or(DEFAULT_DIMENSIONS),
            requested_dimensions: config.dimensions,
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request<'a>(&'a self, texts: &'a [String]) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

fn classify_status(status: StatusCode, body: String) -> EmbeddingError {
    let details = format!("{status}: {body}");
    if status.is_client_error()
        && status != StatusCode::UNAUTHORIZED
        && status != StatusCode::FORBIDDEN
        && status != StatusCode::NOT_FOUND
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        EmbeddingError::Rejected(details)
    } else {
        EmbeddingError::Unavailable(details)
    }
}

fn classify_transport(error: reqwest::Error, timeout: Duration) -> EmbeddingError {
    if error.is_timeout() {
        EmbeddingError::Timeout(timeout)
    } else {
        EmbeddingError::Unavailable(error.to_string())
    }
}

/// Puts vectors back in input order; the API tags each one with its input index.
fn into_ordered(
    mut response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    response.data.sort_by_key(|entry| entry.index);
    if response.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: response.data.len(),
        });
    }
    Ok(response
        .data
        .into_iter()
        .map(|entry| entry.embedding)
        .collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request(texts))
            .send()
            .await
            .map_err(|error| classify_transport(error, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, body));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingError::Unavailable(format!("unreadable embedding response: {error}"))
        })?;
        into_ordered(parsed, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> OpenAiConfig {
        OpenAiConfig {
            api_key: api_key.map(str::to_string),
            ..OpenAiConfig::default()
        }
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        assert!(matches!(
            OpenAiEmbedder::new(config(None)),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            OpenAiEmbedder::new(config(Some("  "))),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn endpoint_is_built_from_base_url() {
        let embedder = OpenAiEmbedder::new(OpenAiConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..config(Some("sk-test"))
        })
        .unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:11434/v1/embeddings");
        assert_eq!(embedder.dimensions(), DEFAULT_DIMENSIONS);
    }

    #[test]
    fn dimensions_are_only_sent_when_configured() {
        let texts = vec!["bonjour".to_string()];

        let embedder = OpenAiEmbedder::new(config(Some("sk-test"))).unwrap();
        let body = serde_json::to_value(embedder.request(&texts)).unwrap();
        assert!(body.get("dimensions").is_none());
        assert_eq!(body["model"], DEFAULT_MODEL);

        let embedder = OpenAiEmbedder::new(OpenAiConfig {
            dimensions: Some(256),
            ..config(Some("sk-test"))
        })
        .unwrap();
        let body = serde_json::to_value(embedder.request(&texts)).unwrap();
        assert_eq!(body["dimensions"], 256);
        assert_eq!(embedder.dimensions(), 256);

        assert!(matches!(
            OpenAiEmbedder::new(OpenAiConfig {
                dimensions: Some(0),
                ..config(Some("sk-test"))
            }),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn response_is_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#,
        )
        .unwrap();
        assert_eq!(into_ordered(response, 2).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn statuses_are_classified() {
        assert!(classify_status(StatusCode::UNAUTHORIZED, String::new())
            .to_string()
            .contains("unreachable or misconfigured"));
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new())
            .to_string()
            .contains("unreachable or misconfigured"));
        assert!(classify_status(StatusCode::BAD_REQUEST, String::new()).is_recoverable());
    }

    #[tokio::test]
    async fn unreachable_provider_is_unavailable() {
        let embedder = OpenAiEmbedder::new(OpenAiConfig {
            base_url: "http://127.0.0.1:1/v1".to_string(),
            timeout: Duration::from_secs(2),
            ..config(Some("sk-test"))
        })
        .unwrap();
        let result = embedder.embed_batch(&["bonjour".to_string()]).await;
        assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));
    }
}
