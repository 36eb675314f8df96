use serde::{Deserialize, Serialize};

use crate::models::IndexEntry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScoreConvention {
    /// Higher is closer.
    Similarity,
    /// Lower is closer.
    Distance,
}

impl ScoreConvention {
    /// Maps a raw index score onto "higher is more relevant", keeping the order.
    pub fn relevance(self, raw: f32) -> f32 {
        match self {
            Self::Similarity => raw,
            Self::Distance => 1.0 / (1.0 + raw.max(0.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn convention(self) -> ScoreConvention {
        match self {
            Self::Cosine => ScoreConvention::Similarity,
            Self::Euclidean => ScoreConvention::Distance,
        }
    }

    pub fn score(self, left: &[f32], right: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(left, right),
            Self::Euclidean => euclidean_distance(left, right),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Returns 0.0 when either vector has zero norm or the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())) as f32
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
