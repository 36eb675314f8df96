use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use crate::embeddings::{EmbeddingGateway, EmbeddingProvider};
use crate::error::PipelineError;
use crate::models::QueryResult;
use crate::store::ScoredEntry;
use crate::traits::{bounded, VectorIndex};

pub const DEFAULT_OVER_FETCH: usize = 3;
pub const DEFAULT_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Candidates fetched per requested result, so deduplication still leaves `k`.
    pub over_fetch: usize,
    pub excerpt_chars: usize,
    pub index_timeout: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            over_fetch: DEFAULT_OVER_FETCH,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            index_timeout: Duration::from_secs(30),
        }
    }
}

impl QueryOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.over_fetch == 0 {
            return Err(PipelineError::Configuration(
                "over-fetch factor must be at least 1".to_string(),
            ));
        }
        if self.index_timeout.is_zero() {
            return Err(PipelineError::Configuration(
                "index timeout must be positive; set --timeout-secs".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct QueryPipeline<'a, P, V> {
    gateway: &'a EmbeddingGateway<P>,
    index: &'a V,
    options: QueryOptions,
}

impl<'a, P, V> QueryPipeline<'a, P, V>
where
    P: EmbeddingProvider,
    V: VectorIndex,
{
    pub fn new(
        gateway: &'a EmbeddingGateway<P>,
        index: &'a V,
        options: QueryOptions,
    ) -> Result<Self, PipelineError> {
        options.validate()?;
        Ok(Self {
            gateway,
            index,
            options,
        })
    }

    /// At most `k` results, one per job, most relevant first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<QueryResult>, PipelineError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(PipelineError::InvalidQuery("query is empty".to_string()));
        }

        let after = self.options.index_timeout;
        if bounded("index size check", after, self.index.len()).await? == 0 {
            return Err(PipelineError::IndexUnavailable(
                "the index is empty; run `job-rag index` first".to_string(),
            ));
        }

        let vector = self
            .gateway
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                PipelineError::EmbeddingUnavailable("no vector returned for the query".to_string())
            })?;

        let wanted = k.saturating_mul(self.options.over_fetch);
        let candidates = bounded("index query", after, self.index.query(&vector, wanted)).await?;
        debug!(candidates = candidates.len(), wanted, "index returned candidates");

        Ok(self.rank(candidates, k))
    }

    fn rank(&self, candidates: Vec<ScoredEntry>, k: usize) -> Vec<QueryResult> {
        let convention = self.index.score_convention();
        let mut scored = candidates
            .into_iter()
            .map(|candidate| (convention.relevance(candidate.score), candidate))
            .collect::<Vec<_>>();
        // Stable: equal scores keep the order the index returned them in.
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter(|(_, candidate)| seen.insert(candidate.entry.metadata.slug.clone()))
            .take(k)
            .map(|(relevance, candidate)| {
                let entry = candidate.entry;
                QueryResult {
                    title: entry.metadata.title,
                    sector: entry.metadata.sector,
                    salary_min: entry.metadata.salary_min,
                    salary_max: entry.metadata.salary_max,
                    slug: entry.metadata.slug,
                    url: entry.metadata.url,
                    relevance_score: relevance,
                    excerpt: entry.text.chars().take(self.options.excerpt_chars).collect(),
                    chunk_id: entry.id,
                }
            })
            .collect()
    }
}
