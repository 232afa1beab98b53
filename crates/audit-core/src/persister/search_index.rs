//! Persister sobre un índice de búsqueda (bulk API).
//!
//! Cada evento se transforma en un documento con la forma field-map y el
//! batch completo se envía en una sola llamada bulk. El nombre del índice es
//! una plantilla: `%s` se sustituye por `-YYYY.MM.DD` (fecha UTC de
//! escritura), de modo que los eventos quedan particionados por día.
//!
//! Fallos parciales: si el sink rechaza documentos individuales, cada
//! rechazo se registra con el documento completo y la llamada devuelve
//! `Persistence`. Los documentos aceptados quedan escritos.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde_json::Value;

use super::Persister;
use crate::errors::AuditError;
use crate::event::{to_field_map, AuditEvent};

/// Documento listo para el bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    /// `None`: el sink asigna el id.
    pub id: Option<String>,
    pub index: String,
    pub doc_type: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    /// Posición del documento dentro del batch enviado.
    pub position: usize,
    pub reason: String,
}

/// Resultado por documento de una llamada bulk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub failures: Vec<BulkItemFailure>,
}

impl BulkResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cliente opaco del motor de búsqueda.
pub trait BulkIndexClient: Send + Sync {
    /// `Err` sólo cuando la llamada completa falla (p.ej. `Connection`).
    fn bulk_index(&self, documents: &[IndexDocument]) -> Result<BulkResponse, AuditError>;
}

impl<C: BulkIndexClient + ?Sized> BulkIndexClient for Arc<C> {
    fn bulk_index(&self, documents: &[IndexDocument]) -> Result<BulkResponse, AuditError> {
        (**self).bulk_index(documents)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchIndexConfig {
    /// Plantilla del índice, p.ej. `audit%s`.
    pub index: String,
    pub doc_type: String,
    /// Usar el id de transacción como id de documento. Sólo es correcto si
    /// cada transacción produce un único evento.
    pub reuse_transaction_id: bool,
}

impl SearchIndexConfig {
    pub fn new(index: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self { index: index.into(),
               doc_type: doc_type.into(),
               reuse_transaction_id: false }
    }
}

/// Sustituye `%s` por `-YYYY.MM.DD` de `date`.
pub fn index_name_at(template: &str, date: DateTime<Utc>) -> String {
    template.replacen("%s", &format!("-{}", date.format("%Y.%m.%d")), 1)
}

pub struct SearchIndexPersister<C: BulkIndexClient> {
    client: C,
    config: SearchIndexConfig,
}

impl<C: BulkIndexClient> SearchIndexPersister<C> {
    pub fn new(client: C, config: SearchIndexConfig) -> Result<Self, AuditError> {
        if config.index.trim().is_empty() {
            return Err(AuditError::Configuration("You need to configure a 'index' name to store your events.".into()));
        }
        if config.doc_type.trim().is_empty() {
            return Err(AuditError::Configuration("You need to configure a 'type' name to map your events.".into()));
        }
        Ok(Self { client, config })
    }

    pub fn reuse_transaction_id(&mut self, reuse: bool) {
        self.config.reuse_transaction_id = reuse;
    }

    pub fn config(&self) -> &SearchIndexConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Índice de destino para una escritura hecha ahora.
    pub fn index_name(&self) -> String {
        index_name_at(&self.config.index, Utc::now())
    }

    pub fn transform_to_documents(&self, events: &[AuditEvent]) -> Vec<IndexDocument> {
        let index = self.index_name();
        events.iter()
              .map(|event| IndexDocument { id: self.config
                                                   .reuse_transaction_id
                                                   .then(|| event.transaction_id().to_string()),
                                           index: index.clone(),
                                           doc_type: self.config.doc_type.clone(),
                                           body: to_field_map(event) })
              .collect()
    }
}

impl<C: BulkIndexClient> Persister for SearchIndexPersister<C> {
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        if events.is_empty() {
            return Ok(());
        }
        let documents = self.transform_to_documents(events);
        debug!("bulk_index:start index={} documents={}", documents[0].index, documents.len());
        let response = self.client.bulk_index(&documents)?;
        if response.is_ok() {
            return Ok(());
        }
        for failure in response.failures.iter() {
            match documents.get(failure.position) {
                Some(doc) => error!("bulk index rejected document #{} ({}): {}", failure.position, failure.reason, doc.body),
                None => error!("bulk index rejected document #{}: {}", failure.position, failure.reason),
            }
        }
        Err(AuditError::Persistence(format!("{} of {} documents rejected by bulk index",
                                            response.failures.len(),
                                            documents.len())))
    }
}
