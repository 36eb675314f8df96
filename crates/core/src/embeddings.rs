use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::debug;

use crate::error::PipelineError;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unreachable or misconfigured: {0}")]
    Unavailable(String),

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding provider rejected the input: {0}")]
    Rejected(String),

    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding dimension {got} does not match expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbeddingError {
    /// Failures tied to the submitted texts rather than to the provider itself.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Rejected(_))
    }
}

/// External text-to-vector function.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Must return one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[async_trait]
impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(texts).await
    }
}

/// Offline embedder hashing character trigrams into a fixed number of buckets.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// FNV-1a over the UTF-8 bytes of a char window.
fn trigram_hash(window: &[char]) -> u64 {
    let mut buffer = [0u8; 4];
    window
        .iter()
        .flat_map(|ch| ch.encode_utf8(&mut buffer).as_bytes().to_vec())
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

impl CharacterNgramEmbedder {
    /// L2-normalized bag of lowercase character trigrams. Texts shorter than
    /// three chars map to the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let chars = text.to_lowercase().chars().collect::<Vec<_>>();

        let mut vector = vec![0f32; buckets];
        for window in chars.windows(3) {
            vector[(trigram_hash(window) % buckets as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "char-ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
        }
    }
}

impl GatewayOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "embedding batch size must be at least 1; set --batch-size".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(PipelineError::Configuration(
                "at least one embedding request must be allowed in flight; set --max-in-flight"
                    .to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(PipelineError::Configuration(
                "embedding timeout must be positive; set --timeout-secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Batches texts for an [`EmbeddingProvider`] and reassembles the vectors in input order.
pub struct EmbeddingGateway<P> {
    provider: P,
    options: GatewayOptions,
}

impl<P: EmbeddingProvider> EmbeddingGateway<P> {
    pub fn new(provider: P, options: GatewayOptions) -> Result<Self, PipelineError> {
        options.validate()?;
        Ok(Self { provider, options })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = self.options.timeout;
        let provider = &self.provider;

        // `buffered` yields in submission order even when later batches finish first.
        let batches = stream::iter(texts.chunks(self.options.batch_size).enumerate())
            .map(move |(batch_no, batch)| async move {
                let vectors = tokio::time::timeout(timeout, provider.embed_batch(batch))
                    .await
                    .map_err(|_| EmbeddingError::Timeout(timeout))??;

                if vectors.len() != batch.len() {
                    return Err(EmbeddingError::CountMismatch {
                        expected: batch.len(),
                        got: vectors.len(),
                    });
                }

                debug!(
                    provider = provider.name(),
                    batch = batch_no,
                    size = batch.len(),
                    "embedded batch"
                );
                Ok(vectors)
            })
            .buffered(self.options.max_in_flight)
            .try_collect::<Vec<_>>()
            .await?;

        let expected = self.provider.dimensions();
        let vectors = batches.into_iter().flatten().collect::<Vec<_>>();
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                got: bad.len(),
            });
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tags each vector with the input's numeric suffix and finishes early
    /// batches last, so reordering would show up in the output.
    struct SlowFirstProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowFirstProvider {
        fn name(&self) -> &str {
            "slow-first"
        }

        fn dimensions(&self) -> usize {
            1
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = 40u64.saturating_sub(call as u64 * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(texts
                .iter()
                .map(|text| vec![text.trim_start_matches("t").parse::<f32>().unwrap_or(-1.0)])
                .collect())
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl EmbeddingProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        fn dimensions(&self) -> usize {
            1
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    struct ShortProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        fn name(&self) -> &str {
            "short"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0, 1.0]).collect())
        }
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Ingénieur data et analyse");
        let second = embedder.embed("Ingénieur data et analyse");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
        let norm = vector.iter().map(|value| value * value).sum::<f32>();
        assert!((norm - 1.0).abs() < 1e-6);

        assert!(embedder.embed("ab").iter().all(|value| *value == 0.0));
    }

    #[test]
    fn shared_trigrams_bring_texts_closer() {
        let embedder = CharacterNgramEmbedder::default();
        let query = embedder.embed("analyse de données");
        let close = embedder.embed("Exploite les données pour l'analyse");
        let far = embedder.embed("Droit social et dialogue");
        let dot = |left: &[f32], right: &[f32]| {
            left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>()
        };
        assert!(dot(&query, &close) > dot(&query, &far));
    }

    #[test]
    fn trigram_hash_covers_multibyte_chars() {
        assert_ne!(trigram_hash(&['d', 'é', 'v']), trigram_hash(&['d', 'e', 'v']));
        assert_eq!(trigram_hash(&[]), FNV_OFFSET);
    }

    #[test]
    fn zero_sized_options_are_rejected() {
        let options = GatewayOptions {
            batch_size: 0,
            ..GatewayOptions::default()
        };
        assert!(EmbeddingGateway::new(CharacterNgramEmbedder::default(), options).is_err());
    }

    #[tokio::test]
    async fn gateway_preserves_order_across_concurrent_batches() {
        let provider = SlowFirstProvider {
            calls: AtomicUsize::new(0),
        };
        let options = GatewayOptions {
            batch_size: 2,
            max_in_flight: 4,
            ..GatewayOptions::default()
        };
        let gateway = EmbeddingGateway::new(provider, options).unwrap();
        let texts = (0..7).map(|n| format!("t{n}")).collect::<Vec<_>>();

        let vectors = gateway.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), texts.len());
        let tags = vectors.iter().map(|vector| vector[0]).collect::<Vec<_>>();
        assert_eq!(tags, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(gateway.provider().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn gateway_reports_timeouts() {
        let options = GatewayOptions {
            timeout: Duration::from_millis(20),
            ..GatewayOptions::default()
        };
        let gateway = EmbeddingGateway::new(HangingProvider, options).unwrap();
        let result = gateway.embed(&["texte".to_string()]).await;
        assert!(matches!(result, Err(EmbeddingError::Timeout(_))));
    }

    #[tokio::test]
    async fn gateway_rejects_short_responses() {
        let gateway = EmbeddingGateway::new(ShortProvider, GatewayOptions::default()).unwrap();
        let texts = vec!["a".to_string(), "b".to_string()];
        let result = gateway.embed(&texts).await;
        assert!(matches!(
            result,
            Err(EmbeddingError::CountMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[tokio::test]
    async fn boxed_provider_delegates() {
        let boxed: Box<dyn EmbeddingProvider> = Box::new(CharacterNgramEmbedder { dimensions: 16 });
        let gateway = EmbeddingGateway::new(boxed, GatewayOptions::default()).unwrap();
        let vectors = gateway.embed(&["développeur".to_string()]).await.unwrap();
        assert_eq!(gateway.dimensions(), 16);
        assert_eq!(vectors[0].len(), 16);
    }
}
