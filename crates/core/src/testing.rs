//! Stand-ins for the external collaborators, shared by the pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embeddings::{CharacterNgramEmbedder, EmbeddingError, EmbeddingProvider};
use crate::error::IndexError;
use crate::models::{DocumentMetadata, IndexEntry, JobRecord, Salary};
use crate::store::{ScoreConvention, ScoredEntry};
use crate::traits::VectorIndex;

/// Trigram embedder that starts failing after `healthy_calls` requests, and
/// rejects any batch containing `reject_marker`.
pub struct ScriptedProvider {
    inner: CharacterNgramEmbedder,
    healthy_calls: usize,
    reject_marker: Option<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn healthy() -> Self {
        Self {
            inner: CharacterNgramEmbedder::default(),
            healthy_calls: usize::MAX,
            reject_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_after(healthy_calls: usize) -> Self {
        Self {
            healthy_calls,
            ..Self::healthy()
        }
    }

    pub fn rejecting(marker: &'static str) -> Self {
        Self {
            reject_marker: Some(marker),
            ..Self::healthy()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.healthy_calls {
            return Err(EmbeddingError::Unavailable("connection refused".to_string()));
        }
        if let Some(marker) = self.reject_marker {
            if texts.iter().any(|text| text.contains(marker)) {
                return Err(EmbeddingError::Rejected("400 Bad Request".to_string()));
            }
        }
        self.inner.embed_batch(texts).await
    }
}

/// Index that ignores the query vector and replays canned hits.
pub struct CannedIndex {
    pub hits: Vec<ScoredEntry>,
    pub convention: ScoreConvention,
    pub requested_k: Mutex<Option<usize>>,
}

impl CannedIndex {
    pub fn new(hits: Vec<ScoredEntry>, convention: ScoreConvention) -> Self {
        Self {
            hits,
            convention,
            requested_k: Mutex::new(None),
        }
    }
}

#[async_trait]
impl VectorIndex for CannedIndex {
    async fn upsert(&self, _entries: &[IndexEntry]) -> Result<(), IndexError> {
        Ok(())
    }

    async fn query(&self, _vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        if let Ok(mut requested) = self.requested_k.lock() {
            *requested = Some(k);
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }

    async fn reset(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.hits.len())
    }

    fn score_convention(&self) -> ScoreConvention {
        self.convention
    }
}

pub fn hit(chunk_id: &str, score: f32) -> ScoredEntry {
    let slug = chunk_id
        .rsplit_once('_')
        .map(|(slug, _)| slug)
        .unwrap_or(chunk_id);
    ScoredEntry {
        score,
        entry: IndexEntry {
            id: chunk_id.to_string(),
            vector: vec![0.0],
            text: format!("Titre: {slug}\n{}", "détail ".repeat(60)),
            metadata: DocumentMetadata {
                title: slug.to_string(),
                sector: "Tech".to_string(),
                salary_min: Some(40_000),
                salary_max: Some(65_000),
                slug: slug.to_string(),
                url: String::new(),
            },
        },
    }
}

pub fn job(title: &str, sector: &str, min: i64, max: i64) -> JobRecord {
    let mut record = JobRecord::new(title);
    record.sector = Some(sector.to_string());
    record.salary = Some(Salary {
        min,
        max,
        currency: "EUR".to_string(),
    });
    record
}
