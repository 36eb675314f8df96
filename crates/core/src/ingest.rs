use std::collections::HashSet;
use std::time::Duration;

use tracing::{info, warn};

use crate::chunking::{Chunker, ChunkingConfig};
use crate::corpus::CorpusFile;
use crate::embeddings::{EmbeddingGateway, EmbeddingProvider};
use crate::error::{PipelineError, RecordError};
use crate::models::{Chunk, IndexEntry, JobRecord};
use crate::normalize::normalize;
use crate::traits::{bounded, VectorIndex};

pub const DEFAULT_INDEX_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildMode {
    /// Drop every entry before indexing.
    #[default]
    Reset,
    /// Upsert over whatever is already indexed.
    InPlace,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexingOptions {
    pub chunking: ChunkingConfig,
    pub rebuild: RebuildMode,
    pub index_timeout: Duration,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            rebuild: RebuildMode::default(),
            index_timeout: DEFAULT_INDEX_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedRecord {
    /// Position in the corpus `jobs` array.
    pub position: usize,
    pub slug: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IndexingReport {
    pub records_seen: usize,
    pub records_skipped: usize,
    pub chunks_indexed: usize,
    pub skipped: Vec<SkippedRecord>,
    pub corpus_checksum: String,
}

/// Normalize → chunk → embed → upsert, one corpus record at a time.
pub struct IndexingPipeline<'a, P, V> {
    gateway: &'a EmbeddingGateway<P>,
    index: &'a V,
    chunker: Chunker,
    options: IndexingOptions,
}

impl<'a, P, V> IndexingPipeline<'a, P, V>
where
    P: EmbeddingProvider,
    V: VectorIndex,
{
    pub fn new(
        gateway: &'a EmbeddingGateway<P>,
        index: &'a V,
        options: IndexingOptions,
    ) -> Result<Self, PipelineError> {
        if options.index_timeout.is_zero() {
            return Err(PipelineError::Configuration(
                "index timeout must be positive; set --timeout-secs".to_string(),
            ));
        }
        Ok(Self {
            gateway,
            index,
            chunker: Chunker::new(options.chunking)?,
            options,
        })
    }

    /// Indexes the whole corpus.
    ///
    /// Bad records and per-record timeouts are skipped and reported. An
    /// unreachable embedding provider or a failing index aborts the run; the
    /// record being processed at that point has nothing written. So does a
    /// provider that fails every record it is given. Whatever was upserted
    /// before an abort is still flushed.
    pub async fn run(&self, corpus: &CorpusFile) -> Result<IndexingReport, PipelineError> {
        let corpus_checksum = corpus.checksum()?;
        let after = self.options.index_timeout;

        if self.options.rebuild == RebuildMode::Reset {
            bounded("index reset", after, self.index.reset()).await?;
            info!("index reset for full rebuild");
        }

        let mut report = IndexingReport {
            records_seen: 0,
            records_skipped: 0,
            chunks_indexed: 0,
            skipped: Vec::new(),
            corpus_checksum,
        };

        let outcome = self.index_records(corpus, &mut report).await;
        let flushed = bounded("index flush", after, self.index.flush()).await;
        outcome?;
        flushed?;

        info!(
            records_seen = report.records_seen,
            records_skipped = report.records_skipped,
            chunks_indexed = report.chunks_indexed,
            checksum = %report.corpus_checksum,
            "indexing finished"
        );
        Ok(report)
    }

    async fn index_records(
        &self,
        corpus: &CorpusFile,
        report: &mut IndexingReport,
    ) -> Result<(), PipelineError> {
        let after = self.options.index_timeout;
        let mut seen_slugs = HashSet::new();
        let mut embed_attempts = 0usize;
        let mut embed_failures = 0usize;
        let mut last_embed_failure = None;

        for (position, record) in corpus.records().enumerate() {
            report.records_seen += 1;

            let prepared = record.and_then(|record| self.prepare(&record, &mut seen_slugs));
            let (slug, chunks) = match prepared {
                Ok(prepared) => prepared,
                Err(error) => {
                    warn!(position, reason = %error, "skipped job record");
                    report.skip(position, None, error.to_string());
                    continue;
                }
            };

            let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
            embed_attempts += 1;
            let vectors = match self.gateway.embed(&texts).await {
                Ok(vectors) => vectors,
                Err(error) if error.is_recoverable() => {
                    warn!(position, slug = %slug, reason = %error, "skipped job record");
                    report.skip(position, Some(slug), error.to_string());
                    embed_failures += 1;
                    last_embed_failure = Some(error.to_string());
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            let entries = chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry {
                    id: chunk.chunk_id,
                    vector,
                    text: chunk.text,
                    metadata: chunk.source_metadata,
                })
                .collect::<Vec<_>>();

            match bounded("index upsert", after, self.index.upsert(&entries)).await {
                Ok(()) => report.chunks_indexed += entries.len(),
                Err(error @ PipelineError::Timeout { .. }) => {
                    warn!(position, slug = %slug, reason = %error, "skipped job record");
                    report.skip(position, Some(slug), error.to_string());
                }
                Err(error) => return Err(error),
            }
        }

        if embed_attempts > 0 && embed_failures == embed_attempts {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "the embedding provider failed all {embed_attempts} records; last error: {}",
                last_embed_failure.unwrap_or_default()
            )));
        }
        Ok(())
    }

    fn prepare(
        &self,
        record: &JobRecord,
        seen_slugs: &mut HashSet<String>,
    ) -> Result<(String, Vec<Chunk>), RecordError> {
        let document = normalize(record)?;
        let slug = document.metadata.slug.clone();
        if !seen_slugs.insert(slug.clone()) {
            return Err(RecordError::DuplicateSlug(slug));
        }
        let chunks = self.chunker.chunks(&document).collect();
        Ok((slug, chunks))
    }
}

impl IndexingReport {
    fn skip(&mut self, position: usize, slug: Option<String>, reason: String) {
        self.records_skipped += 1;
        self.skipped.push(SkippedRecord {
            position,
            slug,
            reason,
        });
    }
}
