//! Processor units

mod chunking;
mod embedding;

pub use chunking::TextChunker;
pub use embedding::EmbeddingUnit;
