use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, RecordError};
use crate::models::JobRecord;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CorpusMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_jobs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `{ "metadata": ..., "jobs": [...] }` interchange file.
///
/// Jobs stay as raw JSON until iterated so that one malformed entry cannot
/// make the whole file unreadable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CorpusFile {
    #[serde(default)]
    pub metadata: CorpusMetadata,
    #[serde(default)]
    pub jobs: Vec<Value>,
}

impl CorpusFile {
    pub fn from_records(
        mut metadata: CorpusMetadata,
        records: &[JobRecord],
    ) -> Result<Self, PipelineError> {
        metadata.total_jobs = Some(records.len());
        let jobs = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { metadata, jobs })
    }

    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::Configuration(format!(
                    "corpus file {} not found; pass --corpus or create one with `job-rag seed`",
                    path.display()
                )));
            }
            Err(error) => return Err(error.into()),
        };
        Self::from_json(&text)
    }

    /// Writes indented UTF-8 JSON, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = Result<JobRecord, RecordError>> + '_ {
        self.jobs
            .iter()
            .map(|job| JobRecord::deserialize(job).map_err(RecordError::from))
    }

    /// SHA-256 over the serialized jobs, stable across metadata-only edits.
    pub fn checksum(&self) -> Result<String, PipelineError> {
        let mut hasher = Sha256::new();
        for job in &self.jobs {
            hasher.update(serde_json::to_vec(job)?);
            hasher.update(b"\n");
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const RAW: &str = r#"{
        "metadata": { "total_jobs": 2, "sources": ["APEC"], "language": "fr", "scraper": "v2" },
        "jobs": [
            { "title": "DRH", "slug": "drh", "salary": { "min": 50000, "max": 75000, "currency": "EUR" },
              "mbti_fit": ["ENFJ"] },
            { "title": "Contrôleur de gestion", "salary": { "min": "beaucoup", "max": 58000 } }
        ]
    }"#;

    #[test]
    fn malformed_jobs_do_not_break_the_file() {
        let corpus = CorpusFile::from_json(RAW).unwrap();
        let records = corpus.records().collect::<Vec<_>>();
        assert_eq!(records.len(), 2);

        let drh = records[0].as_ref().unwrap();
        assert_eq!(drh.slug.as_deref(), Some("drh"));
        assert_eq!(drh.extra.get("mbti_fit"), Some(&serde_json::json!(["ENFJ"])));
        assert!(matches!(records[1], Err(RecordError::Malformed(_))));
        assert_eq!(
            corpus.metadata.extra.get("scraper"),
            Some(&serde_json::json!("v2"))
        );
    }

    #[test]
    fn checksum_ignores_metadata() {
        let first = CorpusFile::from_json(RAW).unwrap();
        let mut second = first.clone();
        second.metadata.last_updated = Some("2026-02-11".to_string());
        assert_eq!(first.checksum().unwrap(), second.checksum().unwrap());

        second.jobs.pop();
        assert_ne!(first.checksum().unwrap(), second.checksum().unwrap());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("data/jobs/apec-jobs.json");
        let corpus = CorpusFile::from_json(RAW)?;

        corpus.save(&path).await?;
        let text = tokio::fs::read_to_string(&path).await?;
        assert!(text.contains("\n  \"metadata\""));
        assert!(text.contains("Contrôleur"));

        let loaded = CorpusFile::load(&path).await?;
        assert_eq!(loaded, corpus);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let result = CorpusFile::load(&dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn from_records_sets_total() {
        let records = vec![JobRecord::new("Consultant en Stratégie")];
        let corpus = CorpusFile::from_records(CorpusMetadata::default(), &records).unwrap();
        assert_eq!(corpus.metadata.total_jobs, Some(1));
        assert_eq!(corpus.records().next().unwrap().unwrap(), records[0]);
    }
}
