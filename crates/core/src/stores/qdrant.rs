use std::time::Duration;

use crate::error::{IndexError, PipelineError};
use crate::models::{DocumentMetadata, IndexEntry};
use crate::store::{ScoreConvention, ScoredEntry};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::info;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let endpoint = Url::parse(endpoint)?;
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            PipelineError::Configuration(format!("failed to build qdrant http client: {error}"))
        })?;

        Ok(Self {
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client,
            vector_size,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }
        self.create_collection().await
    }

    async fn create_collection(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::Backend {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

/// Qdrant only accepts integer or UUID point ids, so chunk ids are mapped
/// onto a name-based UUID and kept verbatim in the payload.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

fn point_payload(entry: &IndexEntry) -> Value {
    json!({
        "chunk_id": entry.id,
        "text": entry.text,
        "title": entry.metadata.title,
        "sector": entry.metadata.sector,
        "salary_min": entry.metadata.salary_min,
        "salary_max": entry.metadata.salary_max,
        "slug": entry.metadata.slug,
        "url": entry.metadata.url,
    })
}

fn parse_hit(hit: &Value) -> Option<ScoredEntry> {
    let payload = hit.pointer("/payload")?;
    let text_field = |name: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let vector = hit
        .pointer("/vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();

    Some(ScoredEntry {
        score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
        entry: IndexEntry {
            id: payload.get("chunk_id").and_then(Value::as_str)?.to_string(),
            vector,
            text: text_field("text"),
            metadata: DocumentMetadata {
                title: text_field("title"),
                sector: text_field("sector"),
                salary_min: payload.get("salary_min").and_then(Value::as_i64),
                salary_max: payload.get("salary_max").and_then(Value::as_i64),
                slug: text_field("slug"),
                url: text_field("url"),
            },
        },
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        let points = entries
            .iter()
            .map(|entry| {
                if entry.vector.len() != self.vector_size {
                    return Err(IndexError::DimensionMismatch {
                        expected: self.vector_size,
                        got: entry.vector.len(),
                    });
                }

                Ok(json!({
                    "id": point_id(&entry.id),
                    "vector": entry.vector,
                    "payload": point_payload(entry),
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        if vector.len() != self.vector_size {
            return Err(IndexError::DimensionMismatch {
                expected: self.vector_size,
                got: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().filter_map(parse_hit).collect())
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }
        self.create_collection().await
    }

    async fn len(&self) -> Result<usize, IndexError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/points_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::Similarity
    }
}
