
use audit_core::extraction::Row;
use audit_core::persister::{Persister, RowStore, TablePersister, TablePersisterConfig};
use audit_core::{AuditEvent, MetaExtraction};
use diesel::RunQueryDsl;
use audit_persistence::pg::{PgRowStore, PoolProvider};
use serde_json::json;
use test_support::with_pool;
use uuid::Uuid;

fn store(pool: &audit_persistence::PgPool) -> PgRowStore<PoolProvider> {
    PgRowStore::new(PoolProvider { pool: pool.clone() })
}

#[test]
fn table_persister_writes_one_row_per_event() {
    let ran = with_pool(|pool| {
        let tx = Uuid::new_v4().to_string();
        let persister = TablePersister::new(store(pool), TablePersisterConfig::default()).unwrap();
        let data = json!({"title": "A new article"}).as_object().cloned().unwrap();
        let mut create = AuditEvent::create(tx.as_str(), 50, "articles", Some(data.clone()), Some(data)).unwrap();
        create.meta_mut().insert("user".into(), json!("alice"));
        let delete = AuditEvent::delete(tx.as_str(), 7, "comments", None).unwrap().with_parent_source("articles");
        persister.log_events(&[create, delete]).unwrap();

        let rows = persister.store().list_by_transaction(&tx).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].type_, "create");
        assert_eq!(rows[0].primary_key.as_deref(), Some("50"));
        assert_eq!(rows[0].changed.as_deref(), Some(r#"{"title":"A new article"}"#));
        assert_eq!(rows[0].meta.as_deref(), Some(r#"{"user":"alice"}"#));
        assert_eq!(rows[1].type_, "delete");
        assert_eq!(rows[1].changed, None);
        assert_eq!(rows[1].parent_source.as_deref(), Some("articles"));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn rejected_row_does_not_abort_the_batch() {
    let ran = with_pool(|pool| {
        let tx = Uuid::new_v4().to_string();
        let config = TablePersisterConfig { extract_meta_fields: MetaExtraction::All,
                                            ..TablePersisterConfig::default() };
        let persister = TablePersister::new(store(pool), config).unwrap();
        let first = AuditEvent::delete(tx.as_str(), 1, "articles", None).unwrap();
        // columna inexistente en audit_logs
        let mut broken = AuditEvent::delete(tx.as_str(), 2, "articles", None).unwrap();
        broken.meta_mut().insert("no_such_column".into(), json!(1));
        let last = AuditEvent::delete(tx.as_str(), 3, "articles", None).unwrap();

        persister.log_events(&[first, broken, last]).unwrap();
        let keys: Vec<_> = persister.store()
                                    .list_by_transaction(&tx)
                                    .unwrap()
                                    .into_iter()
                                    .map(|r| r.primary_key)
                                    .collect();
        assert_eq!(keys, vec![Some("1".to_string()), Some("3".to_string())]);
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn null_fits_non_text_columns() {
    let ran = with_pool(|pool| {
        let mut conn = pool.get().unwrap();
        let ddl = r#"CREATE TABLE IF NOT EXISTS audit_logs_typed (
                       id BIGSERIAL PRIMARY KEY,
                       "transaction" TEXT NOT NULL,
                       user_id INTEGER NULL,
                       approved BOOLEAN NULL,
                       created TIMESTAMPTZ NULL)"#;
        diesel::sql_query(ddl).execute(&mut conn).unwrap();
        let tx = Uuid::new_v4().to_string();
        let row: Row = [("transaction".to_string(), json!(tx)),
                        ("user_id".to_string(), json!(null)),
                        ("approved".to_string(), json!(null)),
                        ("created".to_string(), json!(null))].into_iter()
                                                             .collect();
        store(pool).save_row("audit_logs_typed", &row).unwrap();

        let with_user: Row = [("transaction".to_string(), json!(tx)),
                              ("user_id".to_string(), json!(42))].into_iter()
                                                                 .collect();
        store(pool).save_row("audit_logs_typed", &with_user).unwrap();
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}
