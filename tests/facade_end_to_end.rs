//! End-to-end exercise of the public `DocStore` facade: collections,
//! indexes, transactions, queries, and the maintenance sweep, all
//! through the crate's public API rather than internal module tests.

use std::collections::HashMap;

use docstore::{DocStoreConfig, DocStore, IndexDefinition, IndexKind, Value};
use tempfile::tempdir;

async fn open_store(dir: &std::path::Path) -> std::sync::Arc<DocStore> {
    let mut config = DocStoreConfig::default();
    config.data_dir = dir.to_path_buf();
    DocStore::open(config).await.unwrap()
}

fn fields(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[tokio::test]
async fn documents_survive_a_full_create_index_query_cycle() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let collection_id = store.create_collection("articles", None, false).await.unwrap();
    store
        .create_index(IndexDefinition {
            name: "articles_by_title".to_string(),
            collection_id,
            field: "title".to_string(),
            kind: IndexKind::Keyed,
            filter_condition: None,
            compound_fields: Vec::new(),
        })
        .unwrap();
    store
        .create_index(IndexDefinition {
            name: "articles_by_body".to_string(),
            collection_id,
            field: "body".to_string(),
            kind: IndexKind::Text,
            filter_condition: None,
            compound_fields: Vec::new(),
        })
        .unwrap();

    let doc_id = store
        .add_document(
            collection_id,
            fields(&[
                ("title", Value::from("rust ownership")),
                ("body", Value::from("borrowing and lifetimes explained")),
            ]),
        )
        .await
        .unwrap();

    let exact = store
        .query_exact("articles_by_title", &Value::from("rust ownership"))
        .await
        .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].id, doc_id);

    let text_hits = store.query_text("articles_by_body", "lifetimes").await.unwrap();
    assert_eq!(text_hits.len(), 1);

    let updated = store
        .update_document(doc_id, fields(&[("title", Value::from("rust borrowing"))]))
        .await
        .unwrap();
    assert!(updated);

    let stale = store
        .query_exact("articles_by_title", &Value::from("rust ownership"))
        .await
        .unwrap();
    assert!(stale.is_empty());
    let fresh = store
        .query_exact("articles_by_title", &Value::from("rust borrowing"))
        .await
        .unwrap();
    assert_eq!(fresh.len(), 1);

    let deleted = store.delete_document(doc_id).await.unwrap();
    assert!(deleted);
    assert!(store.get_document(doc_id).await.is_err());

    let report = store.check_integrity();
    assert!(report.issues.is_empty(), "unexpected integrity issues: {:?}", report.issues);
}

#[tokio::test]
async fn large_payload_round_trips_through_block_storage() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let collection_id = store.create_collection("blobs", None, false).await.unwrap();

    let big = "x".repeat(64 * 1024);
    let doc_id = store
        .add_document(collection_id, fields(&[("payload", Value::from(big.as_str()))]))
        .await
        .unwrap();

    let doc = store.get_document(doc_id).await.unwrap();
    assert_eq!(
        doc.data.as_map().unwrap().get("payload"),
        Some(&Value::from(big.as_str()))
    );
}

#[tokio::test]
async fn checkpoint_clears_the_journal_after_a_snapshot() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let collection_id = store.create_collection("notes", None, false).await.unwrap();
    store
        .add_document(collection_id, fields(&[("text", Value::from("hello"))]))
        .await
        .unwrap();

    store.checkpoint().await.unwrap();
}
