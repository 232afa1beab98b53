//! Sink relacional sobre Postgres (Diesel + r2d2).
//!
//! `PgRowStore` implementa `RowStore` del core: recibe una fila plana ya
//! extraída por `TablePersister` y la inserta con un `INSERT` parametrizado.
//! Las columnas son dinámicas (dependen de la estrategia de extracción), por
//! eso la sentencia se arma en runtime con `sql_query` boxed:
//! - tabla y columnas se validan como identificadores simples antes de
//!   interpolarse;
//! - cada valor se bindea según su tipo JSON, salvo `null`, que va como
//!   literal `NULL` para no chocar con el tipo de la columna;
//! - la columna `created` se castea a `timestamptz`.
//!
//! Errores: un fallo al obtener conexión es `TransientIo` (→ `Connection`
//! en el core, se propaga); un rechazo de la fila es `Persistence` y
//! `TablePersister` lo registra y sigue.

use audit_core::extraction::Row;
use audit_core::persister::RowStore;
use audit_core::AuditError;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{self, ConnectionManager};
use diesel::sql_types::{BigInt, Bool, Double, Text};
use log::{debug, warn};
use serde_json::Value;

use crate::error::PgStoreError;
use crate::migrations::run_pending_migrations;
use crate::schema::audit_logs;

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Columna que se guarda como `timestamptz`.
const TIMESTAMP_COLUMN: &str = "created";

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real (producción/tests de integración) sin
/// acoplar `PgRowStore` a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PgStoreError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PgStoreError> {
        self.pool
            .get()
            .map_err(|e| PgStoreError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila de `audit_logs` para lecturas (backfill / inspección).
#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct AuditLogRecord {
    pub id: i64,
    pub transaction: String,
    pub type_: String,
    pub primary_key: Option<String>,
    pub source: String,
    pub parent_source: Option<String>,
    pub original: Option<String>,
    pub changed: Option<String>,
    pub meta: Option<String>,
    pub created: DateTime<Utc>,
}

pub struct PgRowStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgRowStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Eventos de una transacción en la tabla `audit_logs`, en orden de
    /// inserción.
    pub fn list_by_transaction(&self, transaction_id: &str) -> Result<Vec<AuditLogRecord>, PgStoreError> {
        debug!("list_by_transaction:start transaction={transaction_id}");
        let mut conn = self.provider.connection()?;
        let rows: Vec<AuditLogRecord> = audit_logs::table.filter(audit_logs::transaction.eq(transaction_id))
                                                         .order(audit_logs::id.asc())
                                                         .load(&mut conn)?;
        debug!("list_by_transaction:done transaction={transaction_id} count={}", rows.len());
        Ok(rows)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<(), PgStoreError> {
        let sql = insert_statement(table, row)?;
        let mut query = diesel::sql_query(sql).into_boxed::<Pg>();
        for value in row.values() {
            query = bind_value(query, value);
        }
        let mut conn = self.provider.connection()?;
        query.execute(&mut conn)?;
        Ok(())
    }
}

impl<P: ConnectionProvider> RowStore for PgRowStore<P> {
    fn save_row(&self, table: &str, row: &Row) -> Result<(), AuditError> {
        self.insert(table, row).map_err(AuditError::from)
    }
}

/// Identificador simple (`[A-Za-z_][A-Za-z0-9_]*`), opcionalmente
/// calificado con esquema (`audit.audit_logs`).
pub fn is_valid_identifier(name: &str) -> bool {
    let simple = |part: &str| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
            _ => false,
        }
    };
    match name.split_once('.') {
        Some((schema, table)) => simple(schema) && simple(table),
        None => simple(name),
    }
}

/// `INSERT INTO tabla ("c1", "c2", ...) VALUES ($1, NULL, $2, ...)`.
///
/// Los `null` van como literal `NULL` sin parámetro: un bind tipado no
/// entra en columnas de otro tipo. Los placeholders se numeran sólo sobre
/// los valores no nulos, en el mismo orden que `bind_value`.
pub fn insert_statement(table: &str, row: &Row) -> Result<String, PgStoreError> {
    if !is_valid_identifier(table) {
        return Err(PgStoreError::InvalidIdentifier(table.to_string()));
    }
    if row.is_empty() {
        return Err(PgStoreError::Unknown("cannot insert an empty row".into()));
    }
    let mut columns = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    let mut param = 0;
    for (column, value) in row.iter() {
        if column.contains('.') || !is_valid_identifier(column) {
            return Err(PgStoreError::InvalidIdentifier(column.clone()));
        }
        columns.push(format!("\"{column}\""));
        if value.is_null() {
            placeholders.push("NULL".to_string());
            continue;
        }
        param += 1;
        if column == TIMESTAMP_COLUMN && value.is_string() {
            placeholders.push(format!("${param}::timestamptz"));
        } else {
            placeholders.push(format!("${param}"));
        }
    }
    Ok(format!("INSERT INTO {table} ({}) VALUES ({})", columns.join(", "), placeholders.join(", ")))
}

fn bind_value<'a>(query: BoxedSqlQuery<'a, Pg, SqlQuery>, value: &Value) -> BoxedSqlQuery<'a, Pg, SqlQuery> {
    match value {
        // literal NULL en la sentencia
        Value::Null => query,
        Value::Bool(b) => query.bind::<Bool, _>(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind::<BigInt, _>(i),
            (None, Some(f)) if n.is_f64() => query.bind::<Double, _>(f),
            _ => query.bind::<Text, _>(n.to_string()),
        },
        Value::String(s) => query.bind::<Text, _>(s.clone()),
        // Estructuras sin serializar previamente: se guardan como JSON.
        other => query.bind::<Text, _>(other.to_string()),
    }
}

/// Construye un pool r2d2 y corre las migraciones pendientes.
///
/// - Tamaños 0 se ajustan a 1; si `min_size > max_size` se usa `max_size`.
/// - Devuelve `PgStoreError::TransientIo` ante errores del pool/manager.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PgStoreError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PgStoreError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PgStoreError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee `DbConfig` y construye un pool
/// ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, AuditError> {
    let cfg = crate::config::DbConfig::from_env()?;
    Ok(build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)?)
}
