//! Sinks en memoria para tests y desarrollo local.
//!
//! Cada uno registra lo que recibe y permite inyectar fallos (filas
//! concretas, documentos rechazados o sink inalcanzable).

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use super::{BulkIndexClient, BulkItemFailure, BulkResponse, IndexDocument, MessageProperties, MessagePublisher, RowStore};
use crate::errors::AuditError;
use crate::extraction::Row;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Tabla en memoria: guarda `(tabla, fila)` en orden de escritura.
#[derive(Debug, Default)]
pub struct InMemoryRowStore {
    rows: Mutex<Vec<(String, Row)>>,
    attempts: Mutex<usize>,
    failing: HashSet<usize>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Falla (con `Persistence`) los intentos cuyo índice, base 0, esté en
    /// `attempts`.
    pub fn failing_at(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self { failing: attempts.into_iter().collect(),
               ..Self::default() }
    }

    pub fn rows(&self) -> Vec<(String, Row)> {
        lock(&self.rows).clone()
    }

    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }
}

impl RowStore for InMemoryRowStore {
    fn save_row(&self, table: &str, row: &Row) -> Result<(), AuditError> {
        let attempt = {
            let mut attempts = lock(&self.attempts);
            let current = *attempts;
            *attempts += 1;
            current
        };
        if self.failing.contains(&attempt) {
            return Err(AuditError::Persistence(format!("row {attempt} rejected by {table}")));
        }
        lock(&self.rows).push((table.to_string(), row.clone()));
        Ok(())
    }
}

/// Índice de búsqueda en memoria.
#[derive(Debug, Default)]
pub struct InMemoryBulkIndex {
    documents: Mutex<Vec<IndexDocument>>,
    calls: Mutex<usize>,
    rejecting: HashSet<usize>,
    unreachable: bool,
}

impl InMemoryBulkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rechaza los documentos en esas posiciones de cada batch.
    pub fn rejecting(positions: impl IntoIterator<Item = usize>) -> Self {
        Self { rejecting: positions.into_iter().collect(),
               ..Self::default() }
    }

    pub fn unreachable() -> Self {
        Self { unreachable: true,
               ..Self::default() }
    }

    pub fn documents(&self) -> Vec<IndexDocument> {
        lock(&self.documents).clone()
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

impl BulkIndexClient for InMemoryBulkIndex {
    fn bulk_index(&self, documents: &[IndexDocument]) -> Result<BulkResponse, AuditError> {
        *lock(&self.calls) += 1;
        if self.unreachable {
            return Err(AuditError::Connection("search index unreachable".into()));
        }
        let mut stored = lock(&self.documents);
        let mut response = BulkResponse::ok();
        for (position, doc) in documents.iter().enumerate() {
            if self.rejecting.contains(&position) {
                response.failures.push(BulkItemFailure { position,
                                                         reason: "mapper_parsing_exception".into() });
            } else {
                stored.push(doc.clone());
            }
        }
        Ok(response)
    }
}

/// Mensaje capturado por `InMemoryPublisher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    unreachable: bool,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self { unreachable: true,
               ..Self::default() }
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        lock(&self.messages).clone()
    }
}

impl MessagePublisher for InMemoryPublisher {
    fn publish(&self, exchange: &str, routing_key: &str, body: &[u8], properties: &MessageProperties) -> Result<(), AuditError> {
        if self.unreachable {
            return Err(AuditError::Connection(format!("broker unreachable (exchange '{exchange}')")));
        }
        lock(&self.messages).push(PublishedMessage { exchange: exchange.to_string(),
                                                     routing_key: routing_key.to_string(),
                                                     body: body.to_vec(),
                                                     properties: properties.clone() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_store_fails_only_selected_attempts() {
        let store = InMemoryRowStore::failing_at([1]);
        let mut row = Row::new();
        row.insert("a".into(), json!(1));
        assert!(store.save_row("t", &row).is_ok());
        assert!(store.save_row("t", &row).is_err());
        assert!(store.save_row("t", &row).is_ok());
        assert_eq!(store.attempts(), 3);
        assert_eq!(store.rows().len(), 2);
    }
}
