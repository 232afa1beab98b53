//! audit-stash
//!
//! Librería de fachada: re-exporta el núcleo (`audit_core`) y el sink
//! Postgres (`audit_persistence`), y arma los persisters a partir de la
//! configuración de entorno (`config`).
//!
//! Flujo típico:
//! 1. `AuditConfig::from_env()` + `build_persister` con las conexiones.
//! 2. `AuditCollector::new(persister).with_enrichers(config.enrichers())`.
//! 3. Por cada save/delete de nivel superior: `begin()`, `record_*`,
//!    `commit()` (o `abort()` si la operación falla).

pub mod config;

pub use audit_core::*;
pub use audit_persistence as pg;
pub use config::{build_persist_task, build_persister, AuditConfig, PersisterKind, Sinks};
