pub mod chunking;
pub mod corpus;
pub mod embedders;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod sample;
pub mod store;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod testing;

pub use chunking::{Chunker, ChunkingConfig, Chunks};
pub use corpus::{CorpusFile, CorpusMetadata};
pub use embedders::{OpenAiConfig, OpenAiEmbedder};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingError, EmbeddingGateway, EmbeddingProvider, GatewayOptions,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IndexError, PipelineError, RecordError};
pub use ingest::{IndexingOptions, IndexingPipeline, IndexingReport, RebuildMode, SkippedRecord};
pub use models::{
    Chunk, Document, DocumentMetadata, IndexEntry, JobRecord, QueryResult, Salary,
};
pub use normalize::{normalize, slugify};
pub use orchestrator::{QueryOptions, QueryPipeline};
pub use sample::{sample_corpus, sample_records};
pub use store::{DistanceMetric, ScoreConvention, ScoredEntry};
pub use stores::{IndexManifest, LocalIndex, QdrantStore};
pub use traits::VectorIndex;
