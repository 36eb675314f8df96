pub mod local;
pub mod qdrant;

pub use local::{IndexManifest, LocalIndex};
pub use qdrant::QdrantStore;
