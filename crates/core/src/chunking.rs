use crate::error::PipelineError;
use crate::models::{Chunk, Document};

pub const DEFAULT_MAX_LENGTH: usize = 1_200;
pub const DEFAULT_OVERLAP: usize = 120;

/// Lengths are counted in chars, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_length: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_length == 0 {
            return Err(PipelineError::Configuration(
                "chunk max length must be greater than zero; raise --chunk-max-chars".to_string(),
            ));
        }
        if self.overlap >= self.max_length {
            return Err(PipelineError::Configuration(format!(
                "chunk overlap {} must be smaller than max length {}; lower --chunk-overlap",
                self.overlap, self.max_length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Lazily splits `document` into overlapping chunks. Each call starts over.
    pub fn chunks<'a>(&self, document: &'a Document) -> Chunks<'a> {
        let content = document.content.as_str();
        let mut offsets = content
            .char_indices()
            .map(|(offset, _)| offset)
            .collect::<Vec<_>>();
        offsets.push(content.len());

        Chunks {
            document,
            config: self.config,
            offsets,
            start: 0,
            sequence: 0,
            finished: content.is_empty(),
        }
    }
}

/// Iterator returned by [`Chunker::chunks`].
///
/// Every chunk after the first begins `overlap` chars before the end of its
/// predecessor, so dropping the last `overlap` chars of each non-final chunk
/// and concatenating rebuilds the document content.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    document: &'a Document,
    config: ChunkingConfig,
    /// Byte offset of every char, plus the content length as a sentinel.
    offsets: Vec<usize>,
    start: usize,
    sequence: usize,
    finished: bool,
}

impl Chunks<'_> {
    fn char_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        &self.document.content[self.offsets[start]..self.offsets[end]]
    }

    /// Char index (exclusive) where the chunk starting at `start` should end.
    fn break_point(&self, start: usize) -> usize {
        let window_end = start + self.config.max_length;
        // Ending any earlier would not move the next chunk forward.
        let min_end = start + self.config.overlap + 1;
        let window = self.slice(start, window_end);
        let base = self.offsets[start];

        for separator in ["\n\n", "\n", " "] {
            let Some(found) = window.rfind(separator) else {
                continue;
            };
            let end_byte = base + found + separator.len();
            if let Ok(end) = self.offsets.binary_search(&end_byte) {
                if end >= min_end {
                    return end;
                }
            }
        }

        window_end
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let start = self.start;
        let total = self.char_count();
        let end = if total - start <= self.config.max_length {
            self.finished = true;
            total
        } else {
            self.break_point(start)
        };

        let metadata = &self.document.metadata;
        let chunk = Chunk {
            chunk_id: format!("{}_{}", metadata.slug, self.sequence),
            sequence: self.sequence,
            text: self.slice(start, end).to_string(),
            source_metadata: metadata.clone(),
        };

        self.sequence += 1;
        if !self.finished {
            self.start = end - self.config.overlap;
        }
        Some(chunk)
    }
}
