//! Collection lifecycle, bulk writes and job scheduling over SQLite.

use std::sync::Arc;

use atlas_core::{
    BulkJobDispatcher, Category, CollectionCreate, CollectionService, Error, JobKind, JobQueue,
    ListQuery, MappingSchemaValidator, MemoryJobQueue, Priority, SqliteEntityStore,
    SqliteJobQueue,
};
use serde_json::json;
use tempfile::TempDir;

async fn setup() -> (MemoryJobQueue, CollectionService) {
    let store = SqliteEntityStore::in_memory().await.unwrap();
    let queue = MemoryJobQueue::new();
    let dispatcher =
        BulkJobDispatcher::new(Arc::new(queue.clone()), Arc::new(MappingSchemaValidator));
    (queue, CollectionService::new(Arc::new(store), dispatcher))
}

#[tokio::test]
async fn bulk_merge_then_replace_on_sqlite() {
    let (queue, svc) = setup().await;
    let scope = svc
        .create_collection(CollectionCreate::new("Leaks"))
        .await
        .unwrap();

    let first = svc
        .bulk(
            scope.id,
            &[
                json!({"name": "Acme Corp", "schema": "company", "selectors": ["ACME-1"]}),
                json!({"name": "MV Ocean Star", "schema": "vessel"}),
            ],
            true,
        )
        .await
        .unwrap();
    assert_eq!(first.summary.entities_created, 2);

    let merged = svc
        .bulk(
            scope.id,
            &[json!({"label": "acme corp", "selectors": ["ACME-2"]})],
            true,
        )
        .await
        .unwrap();
    assert_eq!(merged.summary.entities_updated, 1);
    // Reindex of the same collection is still pending, so it was coalesced.
    assert_eq!(merged.reindex.job_id, first.reindex.job_id);
    assert_eq!(queue.len().await, 1);

    let entities = svc
        .list_entities(scope.id, ListQuery::default())
        .await
        .unwrap();
    let acme = entities.iter().find(|e| e.label == "Acme Corp").unwrap();
    assert_eq!(acme.category, Category::Company);
    assert_eq!(acme.selectors.texts(), vec!["Acme Corp", "ACME-1", "ACME-2"]);

    svc.bulk(scope.id, &[json!({"label": "ACME CORP"})], false)
        .await
        .unwrap();
    let entities = svc
        .list_entities(scope.id, ListQuery::default())
        .await
        .unwrap();
    let acme = entities
        .iter()
        .find(|e| e.normalized_label() == "acme corp")
        .unwrap();
    assert_eq!(acme.label, "ACME CORP");
    assert_eq!(acme.category, Category::Other);
    assert_eq!(acme.selectors.len(), 1);
}

#[tokio::test]
async fn entity_id_from_another_collection_is_a_conflict() {
    let (_queue, svc) = setup().await;
    let a = svc
        .create_collection(CollectionCreate::new("A"))
        .await
        .unwrap();
    let b = svc
        .create_collection(CollectionCreate::new("B"))
        .await
        .unwrap();

    svc.bulk(a.id, &[json!({"label": "Acme"})], true)
        .await
        .unwrap();
    let acme = svc
        .list_entities(a.id, ListQuery::default())
        .await
        .unwrap()
        .remove(0);

    let err = svc
        .bulk(
            b.id,
            &[json!({"id": acme.id.to_string(), "label": "Acme"})],
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(
        svc.list_entities(b.id, ListQuery::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn mapping_outranks_reprocess_across_the_service() {
    let (queue, svc) = setup().await;
    let mut input = CollectionCreate::new("Registry");
    input.foreign_id = Some("registry".to_string());
    let scope = svc.create_collection(input).await.unwrap();

    svc.process(scope.id).await.unwrap();
    let body = json!({
        "registry": {
            "queries": [
                {"csv_url": "file:///a.csv", "entities": {"c": {"schema": "Company"}}},
                {"database": "sqlite:///b.db", "entities": {"p": {"schema": "Person", "keys": ["id"]}}}
            ]
        }
    });
    let handles = svc.mapping(scope.id, &body).await.unwrap();
    assert_eq!(handles.len(), 2);
    assert!(handles.iter().all(|h| h.priority == Priority::MAPPING));

    let kinds: Vec<JobKind> = queue.pending().await.iter().map(|h| h.kind).collect();
    assert_eq!(
        kinds,
        vec![JobKind::MappingQuery, JobKind::MappingQuery, JobKind::Reprocess]
    );
}

#[tokio::test]
async fn delete_collection_removes_entities() {
    let (_queue, svc) = setup().await;
    let scope = svc
        .create_collection(CollectionCreate::new("Temp"))
        .await
        .unwrap();
    svc.bulk(
        scope.id,
        &[json!({"label": "One"}), json!({"label": "Two"})],
        true,
    )
    .await
    .unwrap();

    assert_eq!(svc.delete_collection(scope.id).await.unwrap(), 2);
    let err = svc
        .list_entities(scope.id, ListQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn jobs_scheduled_by_one_process_are_claimed_by_another() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("atlas.db");

    let scope = {
        let store = SqliteEntityStore::new(&db).await.unwrap();
        let queue = SqliteJobQueue::new(&db).await.unwrap();
        let dispatcher = BulkJobDispatcher::new(Arc::new(queue), Arc::new(MappingSchemaValidator));
        let svc = CollectionService::new(Arc::new(store), dispatcher);

        let scope = svc
            .create_collection(CollectionCreate::new("Leaks"))
            .await
            .unwrap();
        svc.bulk(scope.id, &[json!({"label": "Acme"})], true)
            .await
            .unwrap();
        svc.process(scope.id).await.unwrap();
        scope
    };

    let runtime = SqliteJobQueue::new(&db).await.unwrap();
    let (first, _) = runtime.take_next().await.unwrap().unwrap();
    let (second, _) = runtime.take_next().await.unwrap().unwrap();
    assert_eq!(first.kind, JobKind::Reindex);
    assert_eq!(second.kind, JobKind::Reprocess);
    assert!(first.collection_id == scope.id && second.collection_id == scope.id);
    assert!(runtime.take_next().await.unwrap().is_none());
}
