//! Repository tests against a live PostgreSQL. Run with
//! `DATABASE_URL=... cargo test -p salesdesk-db -- --ignored`.

use salesdesk_core::catalog::CatalogProvider;
use salesdesk_core::schema::{EntityKind, NaturalKey, ReferenceKind};
use salesdesk_core::store::{
    BatchError, BatchOutcome, EntityStore, PlannedWrite, StoreError, WriteMode,
};
use salesdesk_core::types::Record;
use salesdesk_db::{PgCatalog, PgEntityStore};
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

fn lead(email: &str, name: &str) -> Record {
    let mut r = Record::new();
    r.insert("email".into(), json!(email));
    r.insert("full_name".into(), json!(name));
    r
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn catalog_create_is_idempotent(pool: PgPool) {
    salesdesk_db::health_check(&pool).await.unwrap();
    let catalog = PgCatalog::new(pool);

    let a = catalog.create(ReferenceKind::Program, "Elite").await.unwrap();
    let b = catalog.create(ReferenceKind::Program, "Elite").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(catalog.lookup(ReferenceKind::Program, "Elite").await.unwrap(), Some(a));
    assert_eq!(catalog.lookup(ReferenceKind::Program, "elite").await.unwrap(), None);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn catalog_list_is_sorted(pool: PgPool) {
    let catalog = PgCatalog::new(pool);
    for name in ["bob", "Ana", "carl"] {
        catalog.create(ReferenceKind::Closer, name).await.unwrap();
    }
    assert_eq!(
        catalog.list(ReferenceKind::Closer).await.unwrap(),
        vec!["Ana", "bob", "carl"]
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn entity_insert_find_and_merge(pool: PgPool) {
    let store = PgEntityStore::new(pool);
    let id = store.insert(EntityKind::Lead, &lead("a@x.com", "Ana")).await.unwrap();

    let key = NaturalKey(vec!["a@x.com".into()]);
    let found = store
        .find_by_natural_key(EntityKind::Lead, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, id);

    let mut patch = Record::new();
    patch.insert("email".into(), json!("a@x.com"));
    patch.insert("phone".into(), json!("555"));
    store.update(EntityKind::Lead, id, &patch).await.unwrap();

    let merged = store
        .find_by_natural_key(EntityKind::Lead, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(merged.fields["full_name"], json!("Ana"));
    assert_eq!(merged.fields["phone"], json!("555"));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn entity_update_missing_id(pool: PgPool) {
    let store = PgEntityStore::new(pool);
    let err = store
        .update(EntityKind::Lead, 999, &lead("a@x.com", "Ana"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Missing {
            kind: EntityKind::Lead,
            id: 999
        }
    );
}

fn planned(row_index: usize, email: &str, mode: WriteMode) -> PlannedWrite {
    PlannedWrite {
        row_index,
        key: NaturalKey(vec![email.into()]),
        fields: lead(email, "Someone"),
        mode,
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn batch_rolls_back_on_duplicate_insert(pool: PgPool) {
    let store = PgEntityStore::new(pool);
    store.insert(EntityKind::Lead, &lead("c@x.com", "Cy")).await.unwrap();

    let writes = [
        planned(0, "a@x.com", WriteMode::Insert),
        planned(1, "c@x.com", WriteMode::Insert),
    ];
    let err = store
        .apply_batch(EntityKind::Lead, &writes, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BatchError::at_row(1, StoreError::Duplicate { kind: EntityKind::Lead })
    );

    let key = NaturalKey(vec!["a@x.com".into()]);
    assert!(store
        .find_by_natural_key(EntityKind::Lead, &key)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn batch_upserts_in_one_transaction(pool: PgPool) {
    let store = PgEntityStore::new(pool);
    let writes = [
        planned(0, "a@x.com", WriteMode::Insert),
        planned(1, "a@x.com", WriteMode::Upsert),
        planned(2, "b@x.com", WriteMode::Upsert),
    ];
    let outcome = store
        .apply_batch(EntityKind::Lead, &writes, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, BatchOutcome::Applied { inserted: 2, updated: 1 });
}
