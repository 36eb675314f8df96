use std::future::Future;
use std::time::Duration;

use crate::error::{IndexError, PipelineError};
use crate::models::IndexEntry;
use crate::store::{ScoreConvention, ScoredEntry};
use async_trait::async_trait;

/// Nearest-neighbour store the pipelines write to and read from.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces entries by `id`; the last write for an id wins.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError>;

    /// Up to `k` entries ordered from most to least relevant.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError>;

    async fn reset(&self) -> Result<(), IndexError>;

    async fn len(&self) -> Result<usize, IndexError>;

    /// Makes every accepted upsert durable. Backends that write through on
    /// `upsert` keep the default.
    async fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }

    /// Whether the scores returned by [`VectorIndex::query`] grow or shrink with similarity.
    fn score_convention(&self) -> ScoreConvention;
}

#[async_trait]
impl<V: VectorIndex + ?Sized> VectorIndex for Box<V> {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        (**self).upsert(entries).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        (**self).query(vector, k).await
    }

    async fn reset(&self) -> Result<(), IndexError> {
        (**self).reset().await
    }

    async fn len(&self) -> Result<usize, IndexError> {
        (**self).len().await
    }

    async fn flush(&self) -> Result<(), IndexError> {
        (**self).flush().await
    }

    fn score_convention(&self) -> ScoreConvention {
        (**self).score_convention()
    }
}

/// Runs one index call under a deadline.
pub async fn bounded<T>(
    operation: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T, IndexError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(after, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(PipelineError::Timeout { operation, after }),
    }
}
