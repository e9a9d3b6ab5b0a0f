//! Passage records and passage stores
//!
//! Both retrievers are rebuilt at startup from a persisted passage store: a
//! directory holding `chunks.json`, a JSON array of [`Chunk`] records.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// File name of the passage store inside an index directory
pub const CHUNKS_FILE: &str = "chunks.json";

/// Metadata carried alongside a passage
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DocumentMetadata {
    /// Where the passage came from (file path, URL, ...)
    #[serde(default)]
    pub source: Option<String>,
    /// Custom metadata fields
    #[serde(flatten)]
    pub custom: HashMap<String, String>,
}

/// A retrievable passage of text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk
    pub id: String,
    /// Reference to the parent document ID
    #[serde(default)]
    pub document_id: String,
    /// The chunk text content
    pub content: String,
    /// Chunk index in the document
    #[serde(default)]
    pub chunk_index: usize,
    /// Metadata from the parent document
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(id: impl Into<String>, document_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            content: content.into(),
            chunk_index: 0,
            metadata: DocumentMetadata::default(),
        }
    }

    /// Set the chunk index
    pub fn with_index(mut self, chunk_index: usize) -> Self {
        self.chunk_index = chunk_index;
        self
    }
}

/// Load the passage store from an index directory
pub fn load_chunks(index_dir: &Path) -> Result<Vec<Chunk>> {
    let chunks_path = index_dir.join(CHUNKS_FILE);
    let chunks_json = fs::read_to_string(&chunks_path)
        .with_context(|| format!("Failed to read passage store {:?}", chunks_path))?;
    let chunks: Vec<Chunk> = serde_json::from_str(&chunks_json)
        .with_context(|| format!("Failed to parse passage store {:?}", chunks_path))?;

    if chunks.is_empty() {
        anyhow::bail!("Passage store {:?} is empty", chunks_path);
    }

    tracing::debug!("Loaded {} chunks from {:?}", chunks.len(), chunks_path);
    Ok(chunks)
}

/// Write a passage store into an index directory
pub fn save_chunks(index_dir: &Path, chunks: &[Chunk]) -> Result<()> {
    fs::create_dir_all(index_dir)
        .with_context(|| format!("Failed to create index directory {:?}", index_dir))?;
    let chunks_json = serde_json::to_string_pretty(chunks)?;
    fs::write(index_dir.join(CHUNKS_FILE), chunks_json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_chunks_save_load() {
        let chunks = vec![
            Chunk::new("c1", "doc1", "Braise the pork belly for an hour"),
            Chunk::new("c2", "doc1", "Blanch the greens").with_index(1),
        ];

        let temp_dir = tempdir().unwrap();
        save_chunks(temp_dir.path(), &chunks).unwrap();

        let loaded = load_chunks(temp_dir.path()).unwrap();
        assert_eq!(loaded, chunks);
    }

    #[test]
    fn test_minimal_chunk_json() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join(CHUNKS_FILE),
            r#"[{"id": "a", "content": "steamed fish"}]"#,
        )
        .unwrap();

        let loaded = load_chunks(temp_dir.path()).unwrap();
        assert_eq!(loaded[0].content, "steamed fish");
        assert!(loaded[0].document_id.is_empty());
    }

    #[test]
    fn test_missing_store_is_error() {
        let temp_dir = tempdir().unwrap();
        let err = load_chunks(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to read passage store"));
    }

    #[test]
    fn test_empty_store_is_error() {
        let temp_dir = tempdir().unwrap();
        save_chunks(temp_dir.path(), &[]).unwrap();
        assert!(load_chunks(temp_dir.path()).is_err());
    }
}
