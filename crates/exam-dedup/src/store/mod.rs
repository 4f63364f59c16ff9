//! Persistence collaborator.
//!
//! [`QuestionStore`] is the engine's view of persisted questions: a handful of
//! lookups, an append and a content refresh. The engine never changes an
//! item's id or fingerprint signals after insertion.
//!
//! [`MemoryStore`] keeps everything in process and backs the tests and the CLI.

use ahash::AHashMap;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{DedupError, Result};
use crate::types::{ExtractedContent, NewItem, StoredItem};

pub trait QuestionStore: Send + Sync {
    fn find_by_exact_hash(&self, exact_hash: &str) -> Result<Option<StoredItem>>;

    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<StoredItem>>;

    /// All items carrying a perceptual hash, oldest first.
    fn scan_with_hash(&self) -> Result<Vec<StoredItem>>;

    /// All items carrying an embedding, oldest first.
    fn scan_with_embedding(&self) -> Result<Vec<StoredItem>>;

    /// The `limit` most recently inserted items, newest first.
    fn scan_recent(&self, limit: usize) -> Result<Vec<StoredItem>>;

    /// Persist a new item and return its id.
    fn insert(&self, item: NewItem) -> Result<String>;

    /// Replace the extracted content of an existing item, keeping its id.
    fn update_content(&self, id: &str, content: ExtractedContent, content_hash: String) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<StoredItem>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[derive(Default)]
struct Tables {
    items: Vec<StoredItem>,
    by_id: AHashMap<String, usize>,
    by_exact_hash: AHashMap<String, usize>,
    by_content_hash: AHashMap<String, usize>,
}

/// In-memory [`QuestionStore`] with hash indexes.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuestionStore for MemoryStore {
    fn find_by_exact_hash(&self, exact_hash: &str) -> Result<Option<StoredItem>> {
        let tables = self.tables.read();
        Ok(tables.by_exact_hash.get(exact_hash).map(|&i| tables.items[i].clone()))
    }

    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<StoredItem>> {
        let tables = self.tables.read();
        Ok(tables.by_content_hash.get(content_hash).map(|&i| tables.items[i].clone()))
    }

    fn scan_with_hash(&self) -> Result<Vec<StoredItem>> {
        let tables = self.tables.read();
        Ok(tables
            .items
            .iter()
            .filter(|item| item.perceptual_hash.is_some())
            .cloned()
            .collect())
    }

    fn scan_with_embedding(&self) -> Result<Vec<StoredItem>> {
        let tables = self.tables.read();
        Ok(tables.items.iter().filter(|item| item.embedding.is_some()).cloned().collect())
    }

    fn scan_recent(&self, limit: usize) -> Result<Vec<StoredItem>> {
        let tables = self.tables.read();
        Ok(tables.items.iter().rev().take(limit).cloned().collect())
    }

    fn insert(&self, item: NewItem) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let stored = StoredItem {
            id: id.clone(),
            exact_hash: item.exact_hash,
            perceptual_hash: item.perceptual_hash,
            embedding: item.embedding,
            normalized_text: item.normalized_text,
            content: item.content,
            content_hash: item.content_hash,
            created_at: Utc::now(),
        };

        let mut tables = self.tables.write();
        let index = tables.items.len();
        if let Some(hash) = &stored.exact_hash {
            tables.by_exact_hash.entry(hash.clone()).or_insert(index);
        }
        if !stored.content_hash.is_empty() {
            tables.by_content_hash.entry(stored.content_hash.clone()).or_insert(index);
        }
        tables.by_id.insert(id.clone(), index);
        tables.items.push(stored);

        tracing::debug!(item_id = %id, "Stored new item");
        Ok(id)
    }

    fn update_content(&self, id: &str, content: ExtractedContent, content_hash: String) -> Result<()> {
        let mut tables = self.tables.write();
        let index = *tables
            .by_id
            .get(id)
            .ok_or_else(|| DedupError::store(format!("No stored item with id {}", id)))?;

        let previous = std::mem::replace(&mut tables.items[index].content_hash, content_hash.clone());
        if tables.by_content_hash.get(&previous) == Some(&index) {
            tables.by_content_hash.remove(&previous);
        }
        if !content_hash.is_empty() {
            tables.by_content_hash.entry(content_hash).or_insert(index);
        }
        tables.items[index].content = content;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredItem>> {
        let tables = self.tables.read();
        Ok(tables.by_id.get(id).map(|&i| tables.items[i].clone()))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tables.read().items.len())
    }
}
