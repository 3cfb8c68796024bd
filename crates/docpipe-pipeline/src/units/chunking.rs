use docpipe_core::{CoreError, EmbeddingConfig, Result};

/// Fixed-size character windows with overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CoreError::Validation("chunk_size must be greater than 0".to_string()));
        }
        if overlap >= chunk_size {
            return Err(CoreError::Validation(
                "chunk_overlap must be less than chunk_size".to_string(),
            ));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split `text` into trimmed, non-empty windows
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let step = self.chunk_size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < total {
            let end = (start + self.chunk_size).min(total);
            let chunk: String = chars[start..end].iter().collect();
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= total {
                break;
            }
            start += step;
        }
        chunks
    }
}
