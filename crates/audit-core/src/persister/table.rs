//! Persister relacional: una fila por evento.
//!
//! La fila se arma en tres capas (básicas, clave primaria, metadatos); una
//! columna ya presente nunca es reemplazada por una capa posterior. Los
//! fallos de escritura por fila se registran y el batch continúa.

use std::sync::Arc;

use log::error;

use super::Persister;
use crate::errors::AuditError;
use crate::event::AuditEvent;
use crate::extraction::{extract_basic_fields, extract_meta_fields, extract_primary_key_fields, MetaExtraction,
                        PrimaryKeyStrategy, Row};

pub const DEFAULT_TABLE: &str = "audit_logs";

/// Escritura de una fila en una tabla nombrada.
pub trait RowStore: Send + Sync {
    /// `Persistence` para un rechazo de la fila; `Connection` si el sink no
    /// responde.
    fn save_row(&self, table: &str, row: &Row) -> Result<(), AuditError>;
}

impl<S: RowStore + ?Sized> RowStore for Arc<S> {
    fn save_row(&self, table: &str, row: &Row) -> Result<(), AuditError> {
        (**self).save_row(table, row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePersisterConfig {
    pub table: String,
    pub extract_meta_fields: MetaExtraction,
    pub log_errors: bool,
    pub primary_key_strategy: PrimaryKeyStrategy,
    pub serialize_fields: bool,
    pub unset_extracted_meta_fields: bool,
}

impl Default for TablePersisterConfig {
    fn default() -> Self {
        Self { table: DEFAULT_TABLE.to_string(),
               extract_meta_fields: MetaExtraction::None,
               log_errors: true,
               primary_key_strategy: PrimaryKeyStrategy::Automatic,
               serialize_fields: true,
               unset_extracted_meta_fields: true }
    }
}

pub struct TablePersister<S: RowStore> {
    store: S,
    config: TablePersisterConfig,
}

impl<S: RowStore> TablePersister<S> {
    pub fn new(store: S, config: TablePersisterConfig) -> Result<Self, AuditError> {
        if config.table.trim().is_empty() {
            return Err(AuditError::Configuration("table persister needs a table name".into()));
        }
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &TablePersisterConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn build_row(&self, event: &AuditEvent) -> Row {
        let cfg = &self.config;
        let mut row = extract_basic_fields(event, cfg.serialize_fields);
        for (k, v) in extract_primary_key_fields(event, cfg.primary_key_strategy) {
            row.entry(k).or_insert(v);
        }
        for (k, v) in extract_meta_fields(event,
                                          &cfg.extract_meta_fields,
                                          cfg.unset_extracted_meta_fields,
                                          cfg.serialize_fields)
        {
            row.entry(k).or_insert(v);
        }
        row
    }
}

impl<S: RowStore> Persister for TablePersister<S> {
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        for event in events.iter() {
            let row = self.build_row(event);
            match self.store.save_row(&self.config.table, &row) {
                Ok(()) => {}
                Err(AuditError::Persistence(reason)) => {
                    if self.config.log_errors {
                        let data = serde_json::to_string_pretty(&row).unwrap_or_else(|_| format!("{row:?}"));
                        error!("[TablePersister] Persisting audit log failed: {reason}. Data:\n{data}");
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }
}
