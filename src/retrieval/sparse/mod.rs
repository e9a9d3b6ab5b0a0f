//! Sparse retrieval using BM25
//!
//! Full-text search via tantivy. The index lives in RAM and is rebuilt from
//! the passage store at startup.

use crate::data::{load_chunks, Chunk};
use crate::retrieval::{Retriever, SearchResult};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

/// Writer heap budget
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Sparse retriever using BM25 for keyword search
pub struct Bm25Retriever {
    index: Index,
    reader: IndexReader,
    content_field: Field,
    chunk_id_field: Field,
    /// Mapping from chunk ID to chunk data
    chunks: HashMap<String, Chunk>,
}

impl Bm25Retriever {
    /// Build an in-memory BM25 index over the given chunks
    pub fn new(chunks: Vec<Chunk>) -> Result<Self> {
        if chunks.is_empty() {
            anyhow::bail!("Cannot build index with empty chunks");
        }

        tracing::info!("Building BM25 index: {} chunks", chunks.len());

        let mut schema_builder = Schema::builder();
        let chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut index_writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .context("Failed to create BM25 index writer")?;

        let mut chunks_map = HashMap::with_capacity(chunks.len());
        for chunk in chunks {
            index_writer.add_document(doc!(
                chunk_id_field => chunk.id.clone(),
                content_field => chunk.content.clone(),
            ))?;
            chunks_map.insert(chunk.id.clone(), chunk);
        }
        index_writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            content_field,
            chunk_id_field,
            chunks: chunks_map,
        })
    }

    /// Load the passage store from an index directory and index it
    pub fn load(index_dir: &Path) -> Result<Self> {
        tracing::info!("Loading BM25 retriever from {:?}", index_dir);
        Self::new(load_chunks(index_dir)?)
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Retriever for Bm25Retriever {
    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);

        // Free-form questions carry punctuation the strict grammar rejects
        let (query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("BM25 query parsed leniently ({} issues)", errors.len());
        }

        let top_docs = searcher.search(&query, &TopDocs::with_limit(top_k))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher.doc(doc_address)?;

            let chunk = retrieved_doc
                .get_first(self.chunk_id_field)
                .and_then(|value| value.as_str())
                .and_then(|chunk_id| self.chunks.get(chunk_id));
            if let Some(chunk) = chunk {
                results.push(SearchResult::new(chunk.clone(), score, results.len() + 1));
            }
        }

        Ok(results)
    }

    fn name(&self) -> &str {
        "bm25"
    }
}
