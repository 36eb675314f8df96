use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Salary {
    pub min: i64,
    pub max: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// One job profile as it appears in the corpus file.
///
/// Fields the pipeline does not use (`mbti_fit`, `formations`, ...) are kept
/// in `extra` so a load/save round trip does not lose them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missions: Option<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub required_education: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<Salary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slug: None,
            sector: None,
            description: None,
            missions: None,
            required_skills: Vec::new(),
            required_education: Vec::new(),
            salary: None,
            url: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub sector: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub slug: String,
    pub url: String,
}

/// Canonical text rendering of one [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub sequence: usize,
    pub text: String,
    pub source_metadata: DocumentMetadata,
}

/// The unit persisted by a vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub title: String,
    pub sector: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub slug: String,
    pub url: String,
    pub relevance_score: f32,
    pub excerpt: String,
    pub chunk_id: String,
}
