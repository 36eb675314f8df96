//! Directory-backed index for small corpora.
//!
//! Upserts only touch the in-memory copy. `flush` writes everything to one
//! `index.json` through a temp file and a rename, so a crash never leaves a
//! half-written file. Queries are brute force over the in-memory copy.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::models::IndexEntry;
use crate::store::{DistanceMetric, ScoreConvention, ScoredEntry};
use crate::traits::VectorIndex;

pub const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub metric: DistanceMetric,
    pub dimensions: Option<usize>,
    pub entry_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StoredIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

#[derive(Serialize)]
struct StoredIndexRef<'a> {
    manifest: IndexManifest,
    entries: &'a [IndexEntry],
}

#[derive(Debug)]
struct State {
    dimensions: Option<usize>,
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    updated_at: DateTime<Utc>,
    /// Upserts not yet written by `flush`.
    dirty: bool,
}

impl State {
    fn empty() -> Self {
        Self {
            dimensions: None,
            entries: Vec::new(),
            positions: HashMap::new(),
            updated_at: Utc::now(),
            dirty: false,
        }
    }

    fn manifest(&self, metric: DistanceMetric) -> IndexManifest {
        IndexManifest {
            format_version: FORMAT_VERSION,
            metric,
            dimensions: self.dimensions,
            entry_count: self.entries.len(),
            updated_at: self.updated_at,
        }
    }

    fn insert(&mut self, entry: IndexEntry) {
        match self.positions.get(&entry.id) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}

pub struct LocalIndex {
    dir: PathBuf,
    metric: DistanceMetric,
    state: RwLock<State>,
}

impl LocalIndex {
    /// Loads the index stored in `dir`, or starts an empty one if there is none.
    ///
    /// An existing index keeps the metric it was built with.
    pub async fn open(dir: impl Into<PathBuf>, metric: DistanceMetric) -> Result<Self, IndexError> {
        let dir = dir.into();
        let path = dir.join(INDEX_FILE);

        let (metric, state) = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: StoredIndex = serde_json::from_slice(&bytes)?;
                if stored.manifest.format_version != FORMAT_VERSION {
                    return Err(IndexError::Corrupt(format!(
                        "{} has format version {}, expected {FORMAT_VERSION}",
                        path.display(),
                        stored.manifest.format_version
                    )));
                }
                if stored.manifest.metric != metric {
                    warn!(
                        requested = ?metric,
                        stored = ?stored.manifest.metric,
                        "index was built with a different metric; keeping the stored one"
                    );
                }

                let mut state = State::empty();
                state.dimensions = stored.manifest.dimensions;
                state.updated_at = stored.manifest.updated_at;
                for entry in stored.entries {
                    state.insert(entry);
                }
                (stored.manifest.metric, state)
            }
            Err(error) if error.kind() == ErrorKind::NotFound => (metric, State::empty()),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            dir,
            metric,
            state: RwLock::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub async fn manifest(&self) -> IndexManifest {
        self.state.read().await.manifest(self.metric)
    }

    async fn persist(&self, state: &State) -> Result<(), IndexError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stored = StoredIndexRef {
            manifest: state.manifest(self.metric),
            entries: &state.entries,
        };
        let bytes = serde_json::to_vec(&stored)?;

        let path = self.dir.join(INDEX_FILE);
        let staging = self.dir.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(path = %path.display(), entries = state.entries.len(), "persisted index");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut guard = self.state.write().await;
        let expected = guard.dimensions.unwrap_or(entries[0].vector.len());
        if let Some(bad) = entries.iter().find(|entry| entry.vector.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: bad.vector.len(),
            });
        }

        guard.dimensions = Some(expected);
        guard.updated_at = Utc::now();
        guard.dirty = true;
        for entry in entries {
            guard.insert(entry.clone());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), IndexError> {
        let mut guard = self.state.write().await;
        if !guard.dirty {
            return Ok(());
        }
        self.persist(&guard).await?;
        guard.dirty = false;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        let guard = self.state.read().await;
        if k == 0 || guard.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = guard.dimensions {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }

        let metric = self.metric;
        let mut scored = guard
            .entries
            .iter()
            .map(|entry| ScoredEntry {
                score: metric.score(vector, &entry.vector),
                entry: entry.clone(),
            })
            .collect::<Vec<_>>();

        match metric.convention() {
            ScoreConvention::Similarity => {
                scored.sort_by(|left, right| right.score.total_cmp(&left.score))
            }
            ScoreConvention::Distance => {
                scored.sort_by(|left, right| left.score.total_cmp(&right.score))
            }
        }
        scored.truncate(k);
        Ok(scored)
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let mut guard = self.state.write().await;
        match tokio::fs::remove_file(self.dir.join(INDEX_FILE)).await {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        *guard = State::empty();
        Ok(())
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.state.read().await.entries.len())
    }

    fn score_convention(&self) -> ScoreConvention {
        self.metric.convention()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;
    use tempfile::tempdir;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            text: format!("texte {id}"),
            metadata: DocumentMetadata {
                title: id.to_string(),
                sector: "Business".to_string(),
                salary_min: Some(40_000),
                salary_max: Some(60_000),
                slug: id.split('_').next().unwrap_or(id).to_string(),
                url: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_is_last_write_wins() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path(), DistanceMetric::Cosine).await?;

        index
            .upsert(&[entry("a_0", vec![1.0, 0.0]), entry("b_0", vec![0.0, 1.0])])
            .await?;
        let mut replaced = entry("a_0", vec![0.0, 1.0]);
        replaced.text = "nouveau".to_string();
        index.upsert(&[replaced]).await?;

        assert_eq!(index.len().await?, 2);
        let hits = index.query(&[0.0, 1.0], 5).await?;
        assert_eq!(hits[0].entry.id, "a_0");
        assert_eq!(hits[0].entry.text, "nouveau");
        Ok(())
    }

    #[tokio::test]
    async fn entries_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let index = LocalIndex::open(dir.path(), DistanceMetric::Euclidean).await?;
            index.upsert(&[entry("a_0", vec![1.0, 2.0, 3.0])]).await?;
            index.flush().await?;
        }

        let reopened = LocalIndex::open(dir.path(), DistanceMetric::Cosine).await?;
        assert_eq!(reopened.len().await?, 1);
        let manifest = reopened.manifest().await;
        assert_eq!(manifest.metric, DistanceMetric::Euclidean);
        assert_eq!(manifest.dimensions, Some(3));
        assert_eq!(reopened.score_convention(), ScoreConvention::Distance);
        Ok(())
    }

    #[tokio::test]
    async fn upserts_reach_disk_only_on_flush() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join(INDEX_FILE);
        let index = LocalIndex::open(dir.path(), DistanceMetric::Cosine).await?;

        for n in 0..50 {
            index
                .upsert(&[entry(&format!("job{n}_0"), vec![1.0, n as f32])])
                .await?;
        }
        assert_eq!(index.len().await?, 50);
        assert!(!path.exists());
        assert_eq!(
            LocalIndex::open(dir.path(), DistanceMetric::Cosine)
                .await?
                .len()
                .await?,
            0
        );

        index.flush().await?;
        let written = std::fs::metadata(&path)?.modified()?;
        index.flush().await?;
        assert_eq!(std::fs::metadata(&path)?.modified()?, written);

        let reopened = LocalIndex::open(dir.path(), DistanceMetric::Cosine).await?;
        assert_eq!(reopened.len().await?, 50);
        assert!(!dir.path().join(format!("{INDEX_FILE}.tmp")).exists());
        Ok(())
    }

    #[tokio::test]
    async fn query_orders_by_metric() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let entries = [
            entry("far_0", vec![0.0, 1.0]),
            entry("near_0", vec![1.0, 0.1]),
            entry("mid_0", vec![0.7, 0.7]),
        ];

        let cosine = LocalIndex::open(dir.path().join("cos"), DistanceMetric::Cosine).await?;
        cosine.upsert(&entries).await?;
        let ids = cosine
            .query(&[1.0, 0.0], 2)
            .await?
            .into_iter()
            .map(|hit| hit.entry.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["near_0", "mid_0"]);

        let euclid = LocalIndex::open(dir.path().join("l2"), DistanceMetric::Euclidean).await?;
        euclid.upsert(&entries).await?;
        let hits = euclid.query(&[1.0, 0.0], 3).await?;
        assert_eq!(hits[0].entry.id, "near_0");
        assert!(hits[0].score <= hits[1].score && hits[1].score <= hits[2].score);
        Ok(())
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected_without_partial_write(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path(), DistanceMetric::Cosine).await?;
        index.upsert(&[entry("a_0", vec![1.0, 0.0])]).await?;

        let result = index
            .upsert(&[entry("b_0", vec![1.0, 0.0]), entry("c_0", vec![1.0])])
            .await;
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 2, got: 1 })
        ));
        assert_eq!(index.len().await?, 1);
        assert!(index.query(&[1.0], 1).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn reset_drops_entries_and_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path(), DistanceMetric::Cosine).await?;
        index.upsert(&[entry("a_0", vec![1.0, 0.0])]).await?;
        index.flush().await?;
        assert!(dir.path().join(INDEX_FILE).exists());

        index.reset().await?;
        assert_eq!(index.len().await?, 0);
        assert!(!dir.path().join(INDEX_FILE).exists());
        assert_eq!(index.manifest().await.dimensions, None);

        index.reset().await?;
        Ok(())
    }
}
