//! Consumidor de eventos ya serializados.
//!
//! Recibe field-maps (p.ej. el cuerpo de un mensaje publicado por
//! `QueuePersister`), los reconstruye con `EventFactory` y los entrega al
//! persister final en batches acotados.

use log::info;
use serde_json::Value;

use crate::errors::AuditError;
use crate::event::AuditEvent;
use crate::factory::EventFactory;
use crate::persister::Persister;

pub const DEFAULT_BATCH_SIZE: usize = 50;

pub struct PersistTask<P: Persister> {
    persister: P,
    factory: EventFactory,
    batch_size: usize,
}

impl<P: Persister> PersistTask<P> {
    pub fn new(persister: P) -> Self {
        Self { persister,
               factory: EventFactory::new(),
               batch_size: DEFAULT_BATCH_SIZE }
    }

    /// Un tamaño 0 se trata como 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn persister(&self) -> &P {
        &self.persister
    }

    /// Persiste en batches de `batch_size`. Un batch fallido detiene el
    /// proceso; los anteriores ya quedaron escritos.
    pub fn persist(&self, events: &[AuditEvent]) -> Result<usize, AuditError> {
        if events.is_empty() {
            info!("No more documents to index");
            return Ok(0);
        }
        for chunk in events.chunks(self.batch_size) {
            info!("Indexing {} documents", chunk.len());
            self.persister.log_events(chunk)?;
        }
        Ok(events.len())
    }

    /// Decodifica todo antes de escribir: un field-map inválido no deja
    /// batches a medio persistir.
    pub fn persist_field_maps(&self, items: &[Value]) -> Result<usize, AuditError> {
        let events = self.factory.create_many(items)?;
        self.persist(&events)
    }

    /// Cuerpo de mensaje de la cola (arreglo JSON de field-maps).
    pub fn persist_payload(&self, payload: &[u8]) -> Result<usize, AuditError> {
        let events = self.factory.decode_batch(payload)?;
        self.persist(&events)
    }
}
