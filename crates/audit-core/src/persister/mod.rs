//! Contrato `Persister` y sus estrategias.
//!
//! Un persister recibe el batch ordenado de eventos de una transacción y lo
//! escribe en su sink. El trait no promete reintentos: es idempotente sólo
//! en la medida en que lo sea el sink.
//!
//! Estrategias:
//! - `SearchIndexPersister`: un bulk write a un índice particionado por día.
//! - `TablePersister`: una fila por evento; los fallos por fila se registran
//!   y el batch continúa.
//! - `QueuePersister`: un mensaje (lista JSON de field-maps) a un exchange.
//! - `FanOutPersister`: entrega el mismo batch a varios persisters con
//!   fallos independientes.

mod fan_out;
mod memory;
mod queue;
mod search_index;
mod table;

use std::sync::Arc;

use crate::errors::AuditError;
use crate::event::AuditEvent;

pub use fan_out::FanOutPersister;
pub use memory::{InMemoryBulkIndex, InMemoryPublisher, InMemoryRowStore, PublishedMessage};
pub use queue::{DeliveryMode, MessageProperties, MessagePublisher, QueuePersister, QueuePersisterConfig};
pub use search_index::{index_name_at, BulkIndexClient, BulkItemFailure, BulkResponse, IndexDocument, SearchIndexConfig,
                       SearchIndexPersister};
pub use table::{RowStore, TablePersister, TablePersisterConfig};

/// Escribe un batch de eventos en un sink.
pub trait Persister: Send + Sync {
    /// Persiste los eventos en el orden recibido. Un batch vacío no toca el
    /// sink.
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError>;
}

impl<P: Persister + ?Sized> Persister for &P {
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        (**self).log_events(events)
    }
}

impl<P: Persister + ?Sized> Persister for Box<P> {
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        (**self).log_events(events)
    }
}

impl<P: Persister + ?Sized> Persister for Arc<P> {
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        (**self).log_events(events)
    }
}
