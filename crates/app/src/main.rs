use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use job_rag_core::{
    sample_corpus, CharacterNgramEmbedder, ChunkingConfig, CorpusFile, DistanceMetric,
    EmbeddingGateway, EmbeddingProvider, GatewayOptions, IndexingOptions, IndexingPipeline,
    LocalIndex, OpenAiConfig, OpenAiEmbedder, PipelineError, QdrantStore, QueryOptions,
    QueryPipeline, RebuildMode, VectorIndex, DEFAULT_EMBEDDING_DIMENSIONS,
};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONFIGURATION_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "job-rag", version, about = "Index a job catalog and search it semantically")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(clap::Args)]
struct Settings {
    /// Directory holding the local index
    #[arg(long, env = "JOB_RAG_INDEX_DIR", default_value = "data/index", global = true)]
    index_dir: PathBuf,

    /// Vector index backend
    #[arg(long, env = "JOB_RAG_BACKEND", value_enum, default_value_t = Backend::Local, global = true)]
    backend: Backend,

    /// Distance metric used by the local index
    #[arg(long, env = "JOB_RAG_METRIC", value_enum, default_value_t = Metric::Cosine, global = true)]
    metric: Metric,

    /// Qdrant base URL
    #[arg(long, env = "JOB_RAG_QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "JOB_RAG_QDRANT_COLLECTION", default_value = "apec_jobs", global = true)]
    qdrant_collection: String,

    /// Embedding provider
    #[arg(long, env = "JOB_RAG_EMBEDDER", value_enum, default_value_t = Embedder::Ngram, global = true)]
    embedder: Embedder,

    /// Base URL of an OpenAI-compatible embeddings API
    #[arg(long, env = "JOB_RAG_EMBEDDING_URL", global = true)]
    embedding_url: Option<String>,

    /// Embedding model name
    #[arg(long, env = "JOB_RAG_EMBEDDING_MODEL", global = true)]
    embedding_model: Option<String>,

    /// Vector length produced by the embedder
    #[arg(long, env = "JOB_RAG_EMBEDDING_DIMENSIONS", global = true)]
    embedding_dimensions: Option<usize>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    openai_api_key: Option<String>,

    /// Texts sent per embedding request
    #[arg(long, env = "JOB_RAG_BATCH_SIZE", default_value_t = 32, global = true)]
    batch_size: usize,

    /// Embedding requests allowed in flight at once
    #[arg(long, env = "JOB_RAG_MAX_IN_FLIGHT", default_value_t = 4, global = true)]
    max_in_flight: usize,

    /// Timeout for each embedding or index call, in seconds
    #[arg(long, env = "JOB_RAG_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,

    /// Maximum characters per chunk
    #[arg(long, env = "JOB_RAG_CHUNK_MAX_CHARS", default_value_t = 1_200, global = true)]
    chunk_max_chars: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "JOB_RAG_CHUNK_OVERLAP", default_value_t = 120, global = true)]
    chunk_overlap: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize, chunk, embed and index every job of a corpus file.
    Index {
        /// Corpus JSON file with `metadata` and `jobs`.
        #[arg(long, env = "JOB_RAG_CORPUS")]
        corpus: PathBuf,
        #[arg(long, value_enum, default_value_t = Rebuild::Reset)]
        rebuild: Rebuild,
        /// Query to run once indexing finishes, as a sanity check.
        #[arg(long)]
        smoke_query: Option<String>,
    },
    /// Print the jobs closest to a free-text query as JSON.
    Search {
        query: String,
        #[arg(default_value_t = 5)]
        n_results: usize,
    },
    /// Write the built-in sample catalog as a corpus file.
    Seed {
        #[arg(long, default_value = "data/jobs.json")]
        output: PathBuf,
        /// Replace the file if it already exists.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, ValueEnum)]
enum Metric {
    Cosine,
    Euclidean,
}

impl From<Metric> for DistanceMetric {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::Cosine => DistanceMetric::Cosine,
            Metric::Euclidean => DistanceMetric::Euclidean,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Embedder {
    Ngram,
    Openai,
}

#[derive(Clone, Copy, ValueEnum)]
enum Rebuild {
    Reset,
    InPlace,
}

impl From<Rebuild> for RebuildMode {
    fn from(rebuild: Rebuild) -> Self {
        match rebuild {
            Rebuild::Reset => RebuildMode::Reset,
            Rebuild::InPlace => RebuildMode::InPlace,
        }
    }
}

impl Settings {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            batch_size: self.batch_size,
            max_in_flight: self.max_in_flight,
            timeout: self.timeout(),
        }
    }

    fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_length: self.chunk_max_chars,
            overlap: self.chunk_overlap,
        }
    }

    fn embedding_provider(&self) -> Result<Box<dyn EmbeddingProvider>, PipelineError> {
        match self.embedder {
            Embedder::Ngram => Ok(Box::new(CharacterNgramEmbedder {
                dimensions: self
                    .embedding_dimensions
                    .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            })),
            Embedder::Openai => {
                let defaults = OpenAiConfig::default();
                let embedder = OpenAiEmbedder::new(OpenAiConfig {
                    api_key: self.openai_api_key.clone(),
                    base_url: self.embedding_url.clone().unwrap_or(defaults.base_url),
                    model: self.embedding_model.clone().unwrap_or(defaults.model),
                    dimensions: self.embedding_dimensions,
                    timeout: self.timeout(),
                })?;
                Ok(Box::new(embedder))
            }
        }
    }

    async fn vector_index(&self, dimensions: usize) -> Result<Box<dyn VectorIndex>, PipelineError> {
        match self.backend {
            Backend::Local => {
                let index = LocalIndex::open(&self.index_dir, self.metric.into()).await?;
                Ok(Box::new(index))
            }
            Backend::Qdrant => {
                if matches!(self.metric, Metric::Euclidean) {
                    warn!("qdrant collections are created with cosine distance; --metric is ignored");
                }
                let store = QdrantStore::new(
                    &self.qdrant_url,
                    self.qdrant_collection.clone(),
                    dimensions,
                    self.timeout(),
                )?;
                // In-place indexing never resets, so the collection may not exist yet.
                store.ensure_collection().await?;
                Ok(Box::new(store))
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(usage_exit_code(&error));
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "job-rag boot"
    );

    let settings = cli.settings;
    let outcome = match cli.command {
        Command::Search { query, n_results } => return search(&settings, &query, n_results).await,
        Command::Index {
            corpus,
            rebuild,
            smoke_query,
        } => index(&settings, &corpus, rebuild.into(), smoke_query.as_deref()).await,
        Command::Seed { output, force } => seed(&output, force).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!("{failure:#}");
            eprintln!("error: {failure:#}");
            let configuration = failure
                .downcast_ref::<PipelineError>()
                .is_some_and(PipelineError::is_configuration);
            if configuration {
                ExitCode::from(CONFIGURATION_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn index(
    settings: &Settings,
    corpus_path: &Path,
    rebuild: RebuildMode,
    smoke_query: Option<&str>,
) -> anyhow::Result<()> {
    let corpus = CorpusFile::load(corpus_path).await?;
    info!(path = %corpus_path.display(), jobs = corpus.len(), "corpus loaded");

    let gateway = EmbeddingGateway::new(settings.embedding_provider()?, settings.gateway_options())?;
    let vector_index = settings.vector_index(gateway.dimensions()).await?;

    let options = IndexingOptions {
        chunking: settings.chunking(),
        rebuild,
        index_timeout: settings.timeout(),
    };
    let report = IndexingPipeline::new(&gateway, &vector_index, options)?
        .run(&corpus)
        .await?;

    for skipped in &report.skipped {
        println!(
            "skipped job #{} ({}): {}",
            skipped.position,
            skipped.slug.as_deref().unwrap_or("unknown slug"),
            skipped.reason
        );
    }
    println!(
        "{} chunks indexed from {} jobs ({} skipped) at {}",
        report.chunks_indexed,
        report.records_seen,
        report.records_skipped,
        Utc::now().to_rfc3339()
    );
    println!("corpus sha256 {}", report.corpus_checksum);

    if let Some(query) = smoke_query {
        let pipeline = QueryPipeline::new(&gateway, &vector_index, query_options(settings))?;
        let results = pipeline.search(query, 3).await?;
        println!("smoke query: {query}");
        for result in results {
            println!(
                "  {:.4} {} ({})",
                result.relevance_score, result.title, result.sector
            );
        }
    }

    Ok(())
}

/// Missing or invalid arguments exit 1; `--help` and `--version` exit 0.
fn usage_exit_code(error: &clap::Error) -> u8 {
    if error.use_stderr() {
        1
    } else {
        0
    }
}

async fn search(settings: &Settings, query: &str, n_results: usize) -> ExitCode {
    let (output, code) = search_outcome(run_search(settings, query, n_results).await);
    println!("{output}");
    ExitCode::from(code)
}

/// Stdout document and exit code for one search. Failures stay machine-readable.
fn search_outcome(result: Result<String, PipelineError>) -> (String, u8) {
    match result {
        Ok(output) => (output, 0),
        Err(failure) => {
            warn!(reason = %failure, "search failed");
            let code = if failure.is_configuration() {
                CONFIGURATION_EXIT
            } else {
                0
            };
            (json!({ "error": failure.to_string(), "jobs": [] }).to_string(), code)
        }
    }
}

async fn run_search(
    settings: &Settings,
    query: &str,
    n_results: usize,
) -> Result<String, PipelineError> {
    let gateway = EmbeddingGateway::new(settings.embedding_provider()?, settings.gateway_options())?;
    let vector_index = settings.vector_index(gateway.dimensions()).await?;
    let pipeline = QueryPipeline::new(&gateway, &vector_index, query_options(settings))?;
    let jobs = pipeline.search(query, n_results).await?;

    let output = json!({
        "query": query,
        "n_results": n_results,
        "jobs": jobs,
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

fn query_options(settings: &Settings) -> QueryOptions {
    QueryOptions {
        index_timeout: settings.timeout(),
        ..QueryOptions::default()
    }
}

async fn seed(output: &Path, force: bool) -> anyhow::Result<()> {
    if !force && tokio::fs::try_exists(output).await.unwrap_or(false) {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            output.display()
        );
    }
    let corpus = sample_corpus()?;
    corpus.save(output).await?;
    println!("{} sample jobs written to {}", corpus.len(), output.display());
    Ok(())
}
