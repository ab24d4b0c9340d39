//! Deterministic fixed-size chunking
//!
//! Splits text into windows of `size` characters with `overlap`
//! characters shared between neighbors. Offsets are byte positions into
//! the input, so chunks always fall on character boundaries even for
//! multi-byte text.

use super::{Chunk, Chunker};

pub struct FixedSizeChunker {
    size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    /// `overlap` must be smaller than `size`; the config layer validates
    /// this before construction.
    pub fn new(size: usize, overlap: usize) -> Self {
        Self {
            size: size.max(1),
            overlap: overlap.min(size.saturating_sub(1)),
        }
    }
}

impl Default for FixedSizeChunker {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_CHUNK_SIZE,
            crate::config::DEFAULT_CHUNK_OVERLAP,
        )
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let step = self.size - self.overlap;

        let mut chunks = Vec::new();
        let mut start_char = 0;
        let mut index: i32 = 0;

        while start_char < boundaries.len() {
            let end_char = start_char + self.size;
            let start_offset = boundaries[start_char];
            let end_offset = if end_char >= boundaries.len() {
                text.len()
            } else {
                boundaries[end_char]
            };

            chunks.push(Chunk {
                index,
                text: text[start_offset..end_offset].to_string(),
                start_offset,
                end_offset,
            });

            if end_char >= boundaries.len() {
                break;
            }
            start_char += step;
            index += 1;
        }

        chunks
    }
}
