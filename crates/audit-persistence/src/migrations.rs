//! Runner de migraciones embebidas (`migrations/` de este crate).
//! Crea la tabla `audit_logs` y sus índices.

use diesel::pg::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::PgStoreError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn run_pending_migrations(conn: &mut PgConnection) -> Result<(), PgStoreError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| PgStoreError::Unknown(format!("migration error: {e}")))
}
