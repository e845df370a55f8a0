//! Filestore facade (spec §4.10, §11.1).
//!
//! `DocStore` is the single entry point: it owns every subcomponent and
//! routes collection/document/query/transaction operations to them,
//! maintaining the write-ahead discipline (journal before visible
//! mutation) and the schema/foreign-key checks along the way.
//!
//! Every document mutation follows the data flow from spec §2: pick a
//! block-store size class by payload size, allocate and write slots,
//! register a pointer-table entry, then run the document-store insert
//! and index updates as a single transaction-manager operation so a
//! failure anywhere rolls the in-memory state back to exactly what it
//! was before the call (spec P4). Block allocation itself is not part of
//! that 2PL operation — block stores and the pointer table are each
//! protected by their own single mutex per spec §5, outside the
//! transaction lock ordering — so newly written, not-yet-committed
//! blocks are freed by hand if the transaction aborts.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression as ZlibLevel;
use parking_lot::RwLock as SyncRwLock;
use serde_json::json;
use tracing::{info, warn};

use crate::block_store::{BlockSizeClass, BlockStore};
use crate::config::{DocStoreConfig, StorageConfig};
use crate::document_store::DocumentStore;
use crate::error::{DocStoreError, Result};
use crate::index_manager::{IndexDefinition, IndexKind, IndexManager};
use crate::journal::Journal;
use crate::maintenance::{IntegrityReport, Maintenance};
use crate::pointer_table::{BlockPointer, PointerTable};
use crate::schema::{DocumentLookup, SchemaValidator};
use crate::telemetry;
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{CollectionDescriptor, Document, DocumentId, PointerEntryId, Value};

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// One request bundled into [`DocStore::atomic_transaction_execute`].
pub enum TxnOp {
    Add {
        collection_id: u64,
        data: HashMap<String, Value>,
    },
    Update {
        doc_id: DocumentId,
        data: HashMap<String, Value>,
    },
    Delete {
        doc_id: DocumentId,
    },
}

/// Which of a prepared op's block-store side effects to clean up, and
/// which collection's document count to adjust, once the composite
/// transaction has either committed or aborted.
struct OpOutcome {
    result_id: DocumentId,
    new_entry: Option<PointerEntryId>,
    old_entry: Option<PointerEntryId>,
    collection_delta: Option<(u64, i64)>,
}

/// The embedded document database. Construct with [`DocStore::open`].
pub struct DocStore {
    config: DocStoreConfig,
    documents: Arc<DocumentStore<Document>>,
    collections: Arc<DocumentStore<CollectionDescriptor>>,
    collection_ids_by_name: SyncRwLock<HashMap<String, u64>>,
    pub index_manager: Arc<IndexManager>,
    block_store: BlockStore,
    pointer_table: PointerTable,
    journal: Journal,
    transactions: TransactionManager,
    next_collection_id: AtomicU64,
}

impl DocStore {
    pub async fn open(config: DocStoreConfig) -> Result<Arc<Self>> {
        telemetry::init();
        config.validate().map_err(DocStoreError::Configuration)?;

        std::fs::create_dir_all(&config.data_dir)?;

        let documents = Arc::new(
            DocumentStore::open(
                config.data_dir.join("documents.json"),
                config.cache.document_cache_capacity,
                0,
            )
            .await?,
        );
        let collections = Arc::new(
            DocumentStore::open(
                config.data_dir.join("collections.json"),
                config.cache.document_cache_capacity,
                0,
            )
            .await?,
        );

        let block_store = BlockStore::open(
            &config.data_dir.join("blocks"),
            config.storage.small_block_size,
            config.storage.medium_block_size,
            config.storage.large_block_size,
        )
        .await?;
        let pointer_table = PointerTable::new();

        // Re-derive each block store's free list from the pointer table
        // (spec §9: free lists aren't persisted across restarts).
        let mut allocated: HashMap<BlockSizeClass, std::collections::HashSet<u64>> = HashMap::new();
        for pointer in pointer_table.all_live_pointers() {
            allocated.entry(pointer.class).or_default().insert(pointer.slot);
        }
        for class in [BlockSizeClass::Small, BlockSizeClass::Medium, BlockSizeClass::Large] {
            block_store
                .store_for(class)
                .rebuild_free_list(allocated.entry(class).or_default());
        }

        let journal = Journal::open(config.data_dir.join("journal.log")).await?;

        let mut collection_ids_by_name = HashMap::new();
        let all_collection_ids = collections.all_ids();
        for id in &all_collection_ids {
            if let Ok(descriptor) = collections.get(*id) {
                if !descriptor.deleted {
                    collection_ids_by_name.insert(descriptor.name.clone(), *id);
                }
            }
        }
        let next_collection_id = all_collection_ids.into_iter().max().unwrap_or(0) + 1;

        let index_manager = IndexManager::new(config.index.clone());
        let transactions = TransactionManager::new(config.transaction.timeout);

        Ok(Arc::new(Self {
            config,
            documents,
            collections,
            collection_ids_by_name: SyncRwLock::new(collection_ids_by_name),
            index_manager,
            block_store,
            pointer_table,
            journal,
            transactions,
            next_collection_id: AtomicU64::new(next_collection_id),
        }))
    }

    // ---- Collections -----------------------------------------------

    pub async fn create_collection(
        &self,
        name: &str,
        schema: Option<crate::types::SchemaDefinition>,
        enforce_schema: bool,
    ) -> Result<u64> {
        if self.collection_ids_by_name.read().contains_key(name) {
            return Err(DocStoreError::CollectionAlreadyExists(name.to_string()));
        }
        let id = self.next_collection_id.fetch_add(1, Ordering::SeqCst);
        let now = now_epoch_secs();
        let descriptor = CollectionDescriptor {
            id,
            name: name.to_string(),
            schema,
            enforce_schema,
            document_count: 0,
            created_at: now,
            updated_at: now,
            deleted: false,
        };

        self.journal
            .log_operation("create_collection", json!({"id": id, "name": name}))
            .await?;

        self.collections.insert_with_id(id, descriptor);
        self.collection_ids_by_name.write().insert(name.to_string(), id);
        self.collections.persist().await?;
        info!(collection_id = id, name, "collection created");
        Ok(id)
    }

    pub fn get_collection(&self, id: u64) -> Result<CollectionDescriptor> {
        let descriptor = self.collections.get(id)?;
        if descriptor.deleted {
            return Err(DocStoreError::CollectionNotFound(id));
        }
        Ok(descriptor)
    }

    pub fn get_collection_by_name(&self, name: &str) -> Result<CollectionDescriptor> {
        let id = *self
            .collection_ids_by_name
            .read()
            .get(name)
            .ok_or(DocStoreError::CollectionNotFound(0))?;
        self.get_collection(id)
    }

    /// Mark a collection as deleted without removing its metadata record
    /// (spec §3: "deletion is logical"). The name is freed immediately so
    /// it can be reused by a later `create_collection`.
    pub async fn delete_collection(&self, id: u64) -> Result<()> {
        let mut descriptor = self.get_collection(id)?;
        descriptor.deleted = true;
        descriptor.updated_at = now_epoch_secs();
        self.collections.update(id, descriptor.clone())?;
        self.collection_ids_by_name.write().remove(&descriptor.name);
        self.journal
            .log_operation("delete_collection", json!({"id": id}))
            .await?;
        self.collections.persist().await?;
        info!(collection_id = id, "collection deleted");
        Ok(())
    }

    async fn bump_document_count(&self, collection_id: u64, delta: i64) -> Result<()> {
        let mut descriptor = self.collections.get(collection_id)?;
        descriptor.document_count = (descriptor.document_count as i64 + delta).max(0) as u64;
        descriptor.updated_at = now_epoch_secs();
        self.collections.update(collection_id, descriptor)
    }

    // ---- Indexes ------------------------------------------------------

    pub fn create_index(&self, definition: IndexDefinition) -> Result<()> {
        self.index_manager.create_index(definition)
    }

    // ---- Documents ------------------------------------------------

    pub async fn add_document(
        &self,
        collection_id: u64,
        fields: HashMap<String, Value>,
    ) -> Result<DocumentId> {
        let results = self
            .execute_ops(vec![TxnOp::Add {
                collection_id,
                data: fields,
            }])
            .await?;
        Ok(results[0].1.expect("an Add op always yields a document id"))
    }

    pub async fn update_document(&self, id: DocumentId, fields: HashMap<String, Value>) -> Result<bool> {
        self.execute_ops(vec![TxnOp::Update { doc_id: id, data: fields }])
            .await?;
        Ok(true)
    }

    pub async fn delete_document(&self, id: DocumentId) -> Result<bool> {
        self.execute_ops(vec![TxnOp::Delete { doc_id: id }]).await?;
        Ok(true)
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Document> {
        let meta = self.documents.get(id)?;
        self.materialize(meta).await
    }

    /// Full scan over a collection's documents, applying `predicate` to
    /// each materialized document. Query-language parsing is explicitly
    /// out of scope (spec §1); callers supply the predicate directly.
    pub async fn query_documents<F>(&self, collection_id: u64, predicate: F) -> Result<Vec<Document>>
    where
        F: Fn(&Document) -> bool,
    {
        let mut out = Vec::new();
        for id in self.documents.all_ids() {
            let Ok(meta) = self.documents.get(id) else {
                continue;
            };
            if meta.collection_id != collection_id {
                continue;
            }
            let doc = self.materialize(meta).await?;
            if predicate(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Run a bundle of add/update/delete requests as a single atomic
    /// unit: either every request commits or none do (spec §6, §7).
    pub async fn atomic_transaction_execute(
        &self,
        ops: Vec<TxnOp>,
    ) -> Result<Vec<(bool, Option<DocumentId>)>> {
        self.execute_ops(ops).await
    }

    // ---- Queries over indexes --------------------------------------

    pub async fn query_exact(&self, index: &str, value: &Value) -> Result<Vec<Document>> {
        let ids = self.index_manager.query_exact(index, value)?;
        self.materialize_ids(ids).await
    }

    pub async fn query_range(&self, index: &str, start: &Value, end: &Value) -> Result<Vec<Document>> {
        let ids = self.index_manager.query_range(index, start, end)?;
        self.materialize_ids(ids).await
    }

    pub async fn query_text(&self, index: &str, query: &str) -> Result<Vec<Document>> {
        let ids = self.index_manager.text_search(index, query)?;
        self.materialize_ids(ids).await
    }

    async fn materialize_ids(&self, ids: Vec<DocumentId>) -> Result<Vec<Document>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.get_document(id).await?);
        }
        Ok(out)
    }

    /// Fill in `doc.data` by reading its block-stored payload back, when
    /// it has one. Collection-metadata-style documents with no block
    /// pointer keep whatever `data` they already carry.
    async fn materialize(&self, mut doc: Document) -> Result<Document> {
        if let (Some(entry), Some(len)) = (doc.block_pointer, doc.size) {
            let bytes = read_payload(&self.block_store, &self.pointer_table, entry, len).await?;
            let fields = decode_fields(&bytes, doc.compressed)?;
            doc.data = Value::Map(fields);
        }
        Ok(doc)
    }

    // ---- The shared op pipeline --------------------------------------

    /// Prepare every op (schema validation, block allocation/write),
    /// then run them all as one transaction. Pre-transaction failures
    /// (bad collection, missing document, schema violation) free any
    /// blocks already written for earlier ops in this call and abort
    /// before a `Transaction` is even built, since nothing has mutated
    /// document-store or index state yet.
    async fn execute_ops(&self, ops: Vec<TxnOp>) -> Result<Vec<(bool, Option<DocumentId>)>> {
        let mut txn = self.transactions.begin();
        let mut outcomes: Vec<OpOutcome> = Vec::with_capacity(ops.len());

        for op in ops {
            match self.prepare_op(&mut txn, op).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(txn_id = txn.id(), error = %e, "transaction aborted before commit");
                    for outcome in &outcomes {
                        if let Some(entry) = outcome.new_entry {
                            let _ = free_payload(&self.block_store, &self.pointer_table, entry).await;
                        }
                    }
                    return Err(DocStoreError::TransactionAborted(txn.id(), e.to_string()));
                }
            }
        }

        match self.transactions.run_transaction(txn).await {
            Ok(()) => {
                let mut deltas: HashMap<u64, i64> = HashMap::new();
                for outcome in &outcomes {
                    if let Some(entry) = outcome.old_entry {
                        free_payload(&self.block_store, &self.pointer_table, entry).await?;
                    }
                    if let Some((collection_id, delta)) = outcome.collection_delta {
                        *deltas.entry(collection_id).or_insert(0) += delta;
                    }
                }
                for (collection_id, delta) in deltas {
                    self.bump_document_count(collection_id, delta).await?;
                }
                self.documents.persist().await?;
                self.collections.persist().await?;
                Ok(outcomes.iter().map(|o| (true, Some(o.result_id))).collect())
            }
            Err(e) => {
                for outcome in &outcomes {
                    if let Some(entry) = outcome.new_entry {
                        let _ = free_payload(&self.block_store, &self.pointer_table, entry).await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Validate and write the block-store side of a single op, then
    /// register its in-memory apply/undo pair on `txn`.
    async fn prepare_op(&self, txn: &mut Transaction, op: TxnOp) -> Result<OpOutcome> {
        match op {
            TxnOp::Add { collection_id, mut data } => {
                let descriptor = self.get_collection(collection_id)?;
                if descriptor.enforce_schema {
                    if let Some(schema) = &descriptor.schema {
                        SchemaValidator::validate(schema, &mut data, &FacadeLookup { store: self })?;
                    }
                }

                let id = self.documents.allocate_id();
                let (payload, compressed, raw_len) =
                    encode_fields(&data, self.config.storage.compression_threshold)?;
                let class = choose_class(&self.config.storage, raw_len);
                let (entry_id, stored_len) =
                    write_payload(&self.block_store, &self.pointer_table, class, &payload).await?;

                let now = now_epoch_secs();
                let doc = Document {
                    id,
                    collection_id,
                    created_at: now,
                    updated_at: now,
                    compressed,
                    data: Value::Null,
                    block_pointer: Some(entry_id),
                    size: Some(stored_len),
                };

                self.journal
                    .log_operation("add_document", json!({"id": id, "collection_id": collection_id}))
                    .await?;
                info!(txn_id = txn.id(), doc_id = id, collection_id, "document add staged");

                let documents = self.documents.clone();
                let index_manager = self.index_manager.clone();
                let apply_doc = doc.clone();
                let apply_fields = data.clone();
                let undo_fields = data;
                txn.add_operation(
                    &self.documents.key_locks,
                    id,
                    Box::new(move || {
                        documents.insert_with_id(id, apply_doc);
                        index_manager.index_document(collection_id, id, &apply_fields)
                    }),
                    {
                        let documents = self.documents.clone();
                        let index_manager = self.index_manager.clone();
                        Box::new(move || {
                            let _ = index_manager.unindex_document(collection_id, id, &undo_fields);
                            let _ = documents.delete(id);
                            Ok(())
                        })
                    },
                )
                .await;

                Ok(OpOutcome {
                    result_id: id,
                    new_entry: Some(entry_id),
                    old_entry: None,
                    collection_delta: Some((collection_id, 1)),
                })
            }
            TxnOp::Update { doc_id, mut data } => {
                let old_doc = self.documents.get(doc_id)?;
                let descriptor = self.collections.get(old_doc.collection_id)?;
                if descriptor.enforce_schema {
                    if let Some(schema) = &descriptor.schema {
                        SchemaValidator::validate(schema, &mut data, &FacadeLookup { store: self })?;
                    }
                }
                let old_fields = self.materialize(old_doc.clone()).await?.data.as_map().cloned().unwrap_or_default();

                let (payload, compressed, raw_len) =
                    encode_fields(&data, self.config.storage.compression_threshold)?;
                let class = choose_class(&self.config.storage, raw_len);
                let (new_entry, stored_len) =
                    write_payload(&self.block_store, &self.pointer_table, class, &payload).await?;

                let new_doc = Document {
                    id: doc_id,
                    collection_id: old_doc.collection_id,
                    created_at: old_doc.created_at,
                    updated_at: now_epoch_secs(),
                    compressed,
                    data: Value::Null,
                    block_pointer: Some(new_entry),
                    size: Some(stored_len),
                };

                self.journal
                    .log_operation("update_document", json!({"id": doc_id}))
                    .await?;
                info!(
                    txn_id = txn.id(),
                    doc_id,
                    collection_id = old_doc.collection_id,
                    "document update staged"
                );

                let collection_id = old_doc.collection_id;
                let documents = self.documents.clone();
                let index_manager = self.index_manager.clone();
                let apply_new_doc = new_doc.clone();
                let apply_new_fields = data.clone();
                let apply_old_fields = old_fields.clone();
                txn.add_operation(
                    &self.documents.key_locks,
                    doc_id,
                    Box::new(move || {
                        documents.update(doc_id, apply_new_doc)?;
                        index_manager.unindex_document(collection_id, doc_id, &apply_old_fields)?;
                        index_manager.index_document(collection_id, doc_id, &apply_new_fields)
                    }),
                    {
                        let documents = self.documents.clone();
                        let index_manager = self.index_manager.clone();
                        let undo_old_doc = old_doc.clone();
                        let undo_old_fields = old_fields;
                        let undo_new_fields = data;
                        Box::new(move || {
                            let _ = documents.update(doc_id, undo_old_doc);
                            let _ = index_manager.unindex_document(collection_id, doc_id, &undo_new_fields);
                            let _ = index_manager.index_document(collection_id, doc_id, &undo_old_fields);
                            Ok(())
                        })
                    },
                )
                .await;

                Ok(OpOutcome {
                    result_id: doc_id,
                    new_entry: Some(new_entry),
                    old_entry: old_doc.block_pointer,
                    collection_delta: None,
                })
            }
            TxnOp::Delete { doc_id } => {
                let old_doc = self.documents.get(doc_id)?;
                let old_fields = self.materialize(old_doc.clone()).await?.data.as_map().cloned().unwrap_or_default();
                let collection_id = old_doc.collection_id;

                self.journal
                    .log_operation("delete_document", json!({"id": doc_id}))
                    .await?;
                info!(txn_id = txn.id(), doc_id, collection_id, "document delete staged");

                let documents = self.documents.clone();
                let index_manager = self.index_manager.clone();
                let apply_fields = old_fields.clone();
                txn.add_operation(
                    &self.documents.key_locks,
                    doc_id,
                    Box::new(move || {
                        documents.delete(doc_id)?;
                        index_manager.unindex_document(collection_id, doc_id, &apply_fields)
                    }),
                    {
                        let documents = self.documents.clone();
                        let index_manager = self.index_manager.clone();
                        let undo_doc = old_doc.clone();
                        let undo_fields = old_fields;
                        Box::new(move || {
                            documents.insert_with_id(doc_id, undo_doc);
                            index_manager.index_document(collection_id, doc_id, &undo_fields)
                        })
                    },
                )
                .await;

                Ok(OpOutcome {
                    result_id: doc_id,
                    new_entry: None,
                    old_entry: old_doc.block_pointer,
                    collection_delta: Some((collection_id, -1)),
                })
            }
        }
    }

    // ---- Maintenance ------------------------------------------------

    pub fn check_integrity(&self) -> IntegrityReport {
        let document_ids: std::collections::HashSet<u64> =
            self.documents.all_ids().into_iter().collect();
        let with_block_pointer: HashMap<u64, u64> = document_ids
            .iter()
            .filter_map(|id| {
                let doc = self.documents.get(*id).ok()?;
                doc.block_pointer.map(|p| (*id, p))
            })
            .collect();
        Maintenance::check_integrity(
            &self.block_store,
            &self.pointer_table,
            &document_ids,
            &with_block_pointer,
        )
    }

    /// Drop and rebuild each named index from every live document in its
    /// collection (spec §11.4). Materializes block-stored documents along
    /// the way, so this can be expensive on a large store.
    pub async fn rebuild_indexes(&self, index_names: &[String]) -> Result<Vec<(String, Result<(), String>)>> {
        let mut documents = Vec::new();
        for id in self.documents.all_ids() {
            let meta = self.documents.get(id)?;
            let doc = self.materialize(meta).await?;
            let fields = doc.data.as_map().cloned().unwrap_or_default();
            documents.push((id, fields));
        }
        Ok(Maintenance::rebuild_indexes(&self.index_manager, index_names, &documents))
    }

    /// Flush the journal's recorded intents into the durable snapshots,
    /// then clear it. Safe to call any time since every mutation above
    /// already persists its owning store before returning.
    pub async fn checkpoint(&self) -> Result<()> {
        self.documents.persist().await?;
        self.collections.persist().await?;
        self.journal.clear().await
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn config(&self) -> &DocStoreConfig {
        &self.config
    }
}

/// Pick the block-store size class for a payload of `len` raw (pre-
/// compression) bytes (spec §4.10 step 3). Unlike
/// [`BlockStore::class_for_size`], payloads larger than one large block
/// still land in the large store — they just span more than one slot.
fn choose_class(storage: &StorageConfig, len: usize) -> BlockSizeClass {
    if len <= storage.small_block_size {
        BlockSizeClass::Small
    } else if len <= storage.medium_block_size {
        BlockSizeClass::Medium
    } else {
        BlockSizeClass::Large
    }
}

/// Serialize `fields`, deflating it if it crosses `threshold` (0 disables
/// compression). Returns `(bytes to store, compressed?, raw serialized
/// length)` — callers pick the size class from the raw length and the
/// slot count from the stored length.
fn encode_fields(fields: &HashMap<String, Value>, threshold: usize) -> Result<(Vec<u8>, bool, usize)> {
    let raw = serde_json::to_vec(&Value::Map(fields.clone()))?;
    let raw_len = raw.len();
    if threshold > 0 && raw_len > threshold {
        let mut encoder = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
        encoder
            .write_all(&raw)
            .map_err(|e| DocStoreError::Storage(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| DocStoreError::Storage(e.to_string()))?;
        Ok((compressed, true, raw_len))
    } else {
        Ok((raw, false, raw_len))
    }
}

fn decode_fields(bytes: &[u8], compressed: bool) -> Result<HashMap<String, Value>> {
    let raw = if compressed {
        let mut decoder = ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        out
    } else {
        bytes.to_vec()
    };
    let value: Value = serde_json::from_slice(&raw)?;
    Ok(value.as_map().cloned().unwrap_or_default())
}

/// Allocate and write however many slots `bytes` needs in `class`'s
/// store, in order, recording each in a fresh pointer-table entry.
/// Returns `(entry id, bytes actually stored)`.
async fn write_payload(
    block_store: &BlockStore,
    pointer_table: &PointerTable,
    class: BlockSizeClass,
    bytes: &[u8],
) -> Result<(PointerEntryId, u64)> {
    let store = block_store.store_for(class);
    let block_size = store.block_size();
    let total_len = bytes.len();
    let n_slots = if total_len == 0 {
        1
    } else {
        (total_len + block_size - 1) / block_size
    };

    let entry_id = pointer_table.create_entry();
    for i in 0..n_slots {
        let start = i * block_size;
        let end = (start + block_size).min(total_len);
        let chunk = bytes[start..end].to_vec();
        let slot = store.allocate().await?;
        store.write(slot, chunk).await?;
        pointer_table.add_pointer(entry_id, BlockPointer { class, slot })?;
    }
    Ok((entry_id, total_len as u64))
}

/// Read back every block referenced (directly or via indirect chaining)
/// by `entry_id`, concatenated in insertion order and trimmed to
/// `total_len` (blocks are zero-padded, so the last one carries padding
/// past the real payload).
async fn read_payload(
    block_store: &BlockStore,
    pointer_table: &PointerTable,
    entry_id: PointerEntryId,
    total_len: u64,
) -> Result<Vec<u8>> {
    let pointers = pointer_table.pointers(entry_id)?;
    let mut out = Vec::with_capacity(total_len as usize);
    for pointer in pointers {
        let block = block_store.store_for(pointer.class).read(pointer.slot).await?;
        out.extend_from_slice(&block);
    }
    out.truncate(total_len as usize);
    Ok(out)
}

/// Delete a pointer-table entry and release every slot it referenced
/// back to its owning block store's free list.
async fn free_payload(block_store: &BlockStore, pointer_table: &PointerTable, entry_id: PointerEntryId) -> Result<()> {
    let freed = pointer_table.delete_entry(entry_id)?;
    for pointer in freed {
        block_store.store_for(pointer.class).free(pointer.slot);
    }
    Ok(())
}

struct FacadeLookup<'a> {
    store: &'a DocStore,
}

impl DocumentLookup for FacadeLookup<'_> {
    /// Existence check for a `REF`-typed field: the value must be the id of
    /// a live document actually belonging to `collection_name`. A raw
    /// `documents.contains` check isn't enough — it would accept an id that
    /// exists but points at a document in a different collection.
    fn get_document(&self, collection_name: &str, id: u64) -> bool {
        let Ok(collection) = self.store.get_collection_by_name(collection_name) else {
            return false;
        };
        self.store
            .documents
            .get(id)
            .map(|doc| doc.collection_id == collection.id)
            .unwrap_or(false)
    }

    /// Existence check for a foreign-key target: backed by whichever
    /// keyed/ref index is defined on `(collection, field)`, rather than a
    /// full document scan — schema validation runs synchronously and
    /// block-stored payloads can only be read asynchronously, so this
    /// intentionally can't fall back to decoding documents directly.
    fn get_document_by_field(&self, collection_name: &str, field: &str, value: &Value) -> bool {
        let Ok(collection) = self.store.get_collection_by_name(collection_name) else {
            return false;
        };
        let Some(index_name) = self
            .store
            .index_manager
            .find_index_for_field(collection.id, field)
        else {
            return false;
        };
        self.store
            .index_manager
            .query_exact(&index_name, value)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }
}
