//! Index manager (spec §4.6, §11.3).
//!
//! Owns every named secondary index over a collection: keyed and ref
//! B+ tree indexes (separate namespaces), and an inverted text index.
//! Updates can be applied inline or, when `enable_async_updates` is set,
//! handed to a bounded queue drained by a background task — a full queue
//! fails the update immediately rather than blocking the caller.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;

use crate::btree::BPlusTree;
use crate::config::IndexConfig;
use crate::error::{DocStoreError, Result};
use crate::types::{DocumentId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Keyed,
    Ref,
    Text,
}

/// Definition of a single named index.
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub collection_id: u64,
    pub field: String,
    pub kind: IndexKind,
    /// Partial-index predicate: only documents whose field value's index
    /// key matches this exact string are indexed. `None` indexes every
    /// document.
    pub filter_condition: Option<String>,
    /// Additional fields making this a compound index over
    /// `(field, compound_fields[0], compound_fields[1], ...)`.
    pub compound_fields: Vec<String>,
}

#[derive(Default)]
struct UsageStats {
    access_count: AtomicU64,
    total_query_nanos: AtomicU64,
}

enum IndexStorage {
    Ordered(BPlusTree<String, Vec<DocumentId>>),
    Text(HashMap<String, HashSet<DocumentId>>),
}

struct IndexEntry {
    definition: IndexDefinition,
    storage: IndexStorage,
    stats: UsageStats,
}

enum UpdateTask {
    Insert {
        index: String,
        key: String,
        doc_id: DocumentId,
    },
    Remove {
        index: String,
        key: String,
        doc_id: DocumentId,
    },
}

/// Owns every secondary index for the store.
pub struct IndexManager {
    indexes: RwLock<HashMap<String, IndexEntry>>,
    config: IndexConfig,
    async_sender: Option<mpsc::Sender<UpdateTask>>,
    word_re: Regex,
}

impl IndexManager {
    pub fn new(config: IndexConfig) -> Arc<Self> {
        let word_re = Regex::new(r"\w+").expect("static regex");
        let async_sender = if config.enable_async_updates {
            Some(mpsc::channel(config.async_update_queue_size))
        } else {
            None
        };
        let (async_sender, worker_rx) = match async_sender {
            Some((tx, rx)) => (Some(tx), Some(rx)),
            None => (None, None),
        };

        let manager = Arc::new(Self {
            indexes: RwLock::new(HashMap::new()),
            async_sender,
            word_re,
            config,
        });

        if let Some(rx) = worker_rx {
            tokio::spawn(Self::run_async_worker(manager.clone(), rx));
        }
        manager
    }

    async fn run_async_worker(manager: Arc<Self>, mut rx: mpsc::Receiver<UpdateTask>) {
        while let Some(task) = rx.recv().await {
            match task {
                UpdateTask::Insert { index, key, doc_id } => {
                    let _ = manager.apply_insert(&index, &key, doc_id);
                }
                UpdateTask::Remove { index, key, doc_id } => {
                    let _ = manager.apply_remove(&index, &key, doc_id);
                }
            }
        }
    }

    pub fn create_index(&self, definition: IndexDefinition) -> Result<()> {
        if definition.kind == IndexKind::Ref && !self.config.enable_ref_indexing {
            return Err(DocStoreError::Configuration(
                "ref indexing is disabled".to_string(),
            ));
        }
        if !definition.compound_fields.is_empty() && !self.config.enable_compound_indexes {
            return Err(DocStoreError::Configuration(
                "compound indexes are disabled".to_string(),
            ));
        }
        if definition.filter_condition.is_some() && !self.config.enable_partial_indexes {
            return Err(DocStoreError::Configuration(
                "partial indexes are disabled".to_string(),
            ));
        }
        if definition.kind == IndexKind::Text && !self.config.enable_text_search {
            return Err(DocStoreError::Configuration(
                "text search is disabled".to_string(),
            ));
        }

        let mut indexes = self.indexes.write();
        if indexes.contains_key(&definition.name) {
            return Err(DocStoreError::IndexAlreadyExists(definition.name));
        }
        let storage = match definition.kind {
            IndexKind::Text => IndexStorage::Text(HashMap::new()),
            IndexKind::Keyed | IndexKind::Ref => {
                IndexStorage::Ordered(BPlusTree::new(self.config.btree_order))
            }
        };
        indexes.insert(
            definition.name.clone(),
            IndexEntry {
                definition,
                storage,
                stats: UsageStats::default(),
            },
        );
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.indexes
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DocStoreError::IndexNotFound(name.to_string()))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.read().contains_key(name)
    }

    /// Find a non-text index defined on `(collection_id, field)`, if one
    /// exists. Used by foreign-key validation, which needs an exact-match
    /// lookup rather than a full scan over documents.
    pub fn find_index_for_field(&self, collection_id: u64, field: &str) -> Option<String> {
        self.indexes
            .read()
            .values()
            .find(|e| {
                e.definition.kind != IndexKind::Text
                    && e.definition.collection_id == collection_id
                    && e.definition.field == field
            })
            .map(|e| e.definition.name.clone())
    }

    /// Index-relevant fields changing for `doc_id`: applies, or enqueues,
    /// the update for every index defined on the owning collection and
    /// whose field is present in `fields`.
    pub fn index_document(
        &self,
        collection_id: u64,
        doc_id: DocumentId,
        fields: &HashMap<String, Value>,
    ) -> Result<()> {
        let targets: Vec<(String, String, IndexKind)> = {
            let indexes = self.indexes.read();
            indexes
                .values()
                .filter(|e| e.definition.collection_id == collection_id)
                .filter_map(|e| {
                    let value = fields.get(&e.definition.field)?;
                    if let Some(cond) = &e.definition.filter_condition {
                        if &value.index_key() != cond {
                            return None;
                        }
                    }
                    let key = Self::compound_key(&e.definition, value, fields);
                    Some((e.definition.name.clone(), key, e.definition.kind))
                })
                .collect()
        };

        for (name, key, kind) in targets {
            if kind == IndexKind::Text {
                self.index_text(&name, doc_id, &key)?;
            } else {
                self.enqueue_or_apply_insert(name, key, doc_id)?;
            }
        }
        Ok(())
    }

    /// Remove every index entry `index_document` would have inserted for
    /// `fields`. Used on delete and on update (to clear the superseded
    /// entries) and as the undo side of a failed add.
    pub fn unindex_document(
        &self,
        collection_id: u64,
        doc_id: DocumentId,
        fields: &HashMap<String, Value>,
    ) -> Result<()> {
        let targets: Vec<(String, String, IndexKind)> = {
            let indexes = self.indexes.read();
            indexes
                .values()
                .filter(|e| e.definition.collection_id == collection_id)
                .filter_map(|e| {
                    let value = fields.get(&e.definition.field)?;
                    if let Some(cond) = &e.definition.filter_condition {
                        if &value.index_key() != cond {
                            return None;
                        }
                    }
                    let key = Self::compound_key(&e.definition, value, fields);
                    Some((e.definition.name.clone(), key, e.definition.kind))
                })
                .collect()
        };

        for (name, key, kind) in targets {
            if kind == IndexKind::Text {
                for token in self.tokenize(&key) {
                    self.enqueue_or_apply_remove(name.clone(), token, doc_id)?;
                }
            } else {
                self.enqueue_or_apply_remove(name, key, doc_id)?;
            }
        }
        Ok(())
    }

    fn enqueue_or_apply_remove(&self, index: String, key: String, doc_id: DocumentId) -> Result<()> {
        if let Some(sender) = &self.async_sender {
            let index_name = index.clone();
            sender
                .try_send(UpdateTask::Remove { index, key, doc_id })
                .map_err(|_| {
                    warn!(index = %index_name, doc_id, "async index queue full, dropping remove");
                    DocStoreError::QueueFull
                })
        } else {
            self.apply_remove(&index, &key, doc_id)
        }
    }

    fn compound_key(def: &IndexDefinition, primary: &Value, fields: &HashMap<String, Value>) -> String {
        if def.compound_fields.is_empty() {
            return primary.index_key();
        }
        let mut parts = vec![primary.index_key()];
        for f in &def.compound_fields {
            parts.push(
                fields
                    .get(f)
                    .map(|v| v.index_key())
                    .unwrap_or_default(),
            );
        }
        parts.join("\u{1f}")
    }

    fn enqueue_or_apply_insert(&self, index: String, key: String, doc_id: DocumentId) -> Result<()> {
        if let Some(sender) = &self.async_sender {
            let index_name = index.clone();
            sender
                .try_send(UpdateTask::Insert { index, key, doc_id })
                .map_err(|_| {
                    warn!(index = %index_name, doc_id, "async index queue full, dropping insert");
                    DocStoreError::QueueFull
                })
        } else {
            self.apply_insert(&index, &key, doc_id)
        }
    }

    fn apply_insert(&self, index: &str, key: &str, doc_id: DocumentId) -> Result<()> {
        let mut indexes = self.indexes.write();
        let entry = indexes
            .get_mut(index)
            .ok_or_else(|| DocStoreError::IndexNotFound(index.to_string()))?;
        match &mut entry.storage {
            IndexStorage::Ordered(tree) => {
                let mut postings = tree.get(&key.to_string()).cloned().unwrap_or_default();
                if !postings.contains(&doc_id) {
                    postings.push(doc_id);
                }
                tree.insert(key.to_string(), postings);
            }
            IndexStorage::Text(map) => {
                map.entry(key.to_string()).or_default().insert(doc_id);
            }
        }
        Ok(())
    }

    fn apply_remove(&self, index: &str, key: &str, doc_id: DocumentId) -> Result<()> {
        let mut indexes = self.indexes.write();
        let entry = indexes
            .get_mut(index)
            .ok_or_else(|| DocStoreError::IndexNotFound(index.to_string()))?;
        match &mut entry.storage {
            IndexStorage::Ordered(tree) => {
                if let Some(mut postings) = tree.get(&key.to_string()).cloned() {
                    postings.retain(|id| *id != doc_id);
                    if postings.is_empty() {
                        tree.delete(&key.to_string());
                    } else {
                        tree.insert(key.to_string(), postings);
                    }
                }
            }
            IndexStorage::Text(map) => {
                if let Some(set) = map.get_mut(key) {
                    set.remove(&doc_id);
                    if set.is_empty() {
                        map.remove(key);
                    }
                }
            }
        }
        Ok(())
    }

    fn index_text(&self, index: &str, doc_id: DocumentId, text: &str) -> Result<()> {
        for token in self.tokenize(text) {
            self.enqueue_or_apply_insert(index.to_string(), token, doc_id)?;
        }
        Ok(())
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.word_re
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Exact-match lookup on a keyed/ref index.
    pub fn query_exact(&self, index: &str, value: &Value) -> Result<Vec<DocumentId>> {
        let started = Instant::now();
        let mut indexes = self.indexes.write();
        let entry = indexes
            .get_mut(index)
            .ok_or_else(|| DocStoreError::IndexNotFound(index.to_string()))?;
        let result = match &entry.storage {
            IndexStorage::Ordered(tree) => tree.get(&value.index_key()).cloned().unwrap_or_default(),
            IndexStorage::Text(_) => {
                return Err(DocStoreError::Query(format!("{index} is a text index")))
            }
        };
        Self::record_usage(entry, started);
        Ok(result)
    }

    /// Inclusive range lookup on a keyed/ref index.
    pub fn query_range(&self, index: &str, start: &Value, end: &Value) -> Result<Vec<DocumentId>> {
        let started = Instant::now();
        let mut indexes = self.indexes.write();
        let entry = indexes
            .get_mut(index)
            .ok_or_else(|| DocStoreError::IndexNotFound(index.to_string()))?;
        let result = match &entry.storage {
            IndexStorage::Ordered(tree) => tree
                .range(&start.index_key(), &end.index_key())
                .into_iter()
                .flat_map(|(_, ids)| ids)
                .collect(),
            IndexStorage::Text(_) => {
                return Err(DocStoreError::Query(format!("{index} is a text index")))
            }
        };
        Self::record_usage(entry, started);
        Ok(result)
    }

    /// AND-semantics full-text search: a document must contain every
    /// query token to match.
    pub fn text_search(&self, index: &str, query: &str) -> Result<Vec<DocumentId>> {
        let started = Instant::now();
        let tokens = self.tokenize(query);
        let mut indexes = self.indexes.write();
        let entry = indexes
            .get_mut(index)
            .ok_or_else(|| DocStoreError::IndexNotFound(index.to_string()))?;
        let map = match &entry.storage {
            IndexStorage::Text(map) => map,
            IndexStorage::Ordered(_) => {
                return Err(DocStoreError::Query(format!("{index} is not a text index")))
            }
        };
        let mut result: Option<HashSet<DocumentId>> = None;
        for token in &tokens {
            let postings = map.get(token).cloned().unwrap_or_default();
            result = Some(match result {
                Some(acc) => acc.intersection(&postings).copied().collect(),
                None => postings,
            });
        }
        Self::record_usage(entry, started);
        Ok(result.unwrap_or_default().into_iter().collect())
    }

    fn record_usage(entry: &mut IndexEntry, started: Instant) {
        entry.stats.access_count.fetch_add(1, Ordering::Relaxed);
        entry
            .stats
            .total_query_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    /// Per-index access count and average query latency, when usage
    /// statistics are enabled (spec §11.3); otherwise `None`.
    pub fn usage_statistics(&self) -> Option<HashMap<String, (u64, f64)>> {
        if !self.config.enable_usage_statistics {
            return None;
        }
        let indexes = self.indexes.read();
        Some(
            indexes
                .iter()
                .map(|(name, entry)| {
                    let count = entry.stats.access_count.load(Ordering::Relaxed);
                    let total_nanos = entry.stats.total_query_nanos.load(Ordering::Relaxed);
                    let avg_ms = if count > 0 {
                        (total_nanos as f64 / count as f64) / 1_000_000.0
                    } else {
                        0.0
                    };
                    (name.clone(), (count, avg_ms))
                })
                .collect(),
        )
    }

    /// Drop and rebuild a keyed/ref/text index from scratch given the full
    /// set of `(doc_id, fields)` pairs for its collection. Used by the
    /// maintenance sweep.
    pub fn rebuild_index(&self, name: &str, documents: &[(DocumentId, HashMap<String, Value>)]) -> Result<()> {
        let definition = {
            let indexes = self.indexes.read();
            indexes
                .get(name)
                .map(|e| e.definition.clone())
                .ok_or_else(|| DocStoreError::IndexNotFound(name.to_string()))?
        };
        self.drop_index(name)?;
        self.create_index(definition)?;
        for (doc_id, fields) in documents {
            self.index_document_single(name, *doc_id, fields)?;
        }
        Ok(())
    }

    fn index_document_single(
        &self,
        index_name: &str,
        doc_id: DocumentId,
        fields: &HashMap<String, Value>,
    ) -> Result<()> {
        let (field, kind, filter, compound) = {
            let indexes = self.indexes.read();
            let def = &indexes
                .get(index_name)
                .ok_or_else(|| DocStoreError::IndexNotFound(index_name.to_string()))?
                .definition;
            (
                def.field.clone(),
                def.kind,
                def.filter_condition.clone(),
                def.compound_fields.clone(),
            )
        };
        let Some(value) = fields.get(&field) else {
            return Ok(());
        };
        if let Some(cond) = &filter {
            if &value.index_key() != cond {
                return Ok(());
            }
        }
        let key = if compound.is_empty() {
            value.index_key()
        } else {
            let mut parts = vec![value.index_key()];
            for f in &compound {
                parts.push(fields.get(f).map(|v| v.index_key()).unwrap_or_default());
            }
            parts.join("\u{1f}")
        };
        if kind == IndexKind::Text {
            self.index_text(index_name, doc_id, &key)
        } else {
            self.apply_insert(index_name, &key, doc_id)
        }
    }
}
