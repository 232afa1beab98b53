//! audit-persistence
//!
//! Sink relacional Postgres para `TablePersister`.
//!
//! Módulos:
//! - `pg`: `PgRowStore` (implementa `RowStore`), pool r2d2 y lecturas.
//! - `migrations`: runner embebido de migraciones Diesel (`audit_logs`).
//! - `config`: carga de configuración desde .env.
//! - `schema`: tabla Diesel declarada para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PgStoreError;
pub use pg::{build_dev_pool_from_env, build_pool, AuditLogRecord, ConnectionProvider, PgPool, PgRowStore, PoolProvider};
