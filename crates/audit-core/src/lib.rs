//! audit-core: captura y persistencia de eventos de auditoría.
//!
//! Modelo de eventos (create/update/delete), cola por transacción, enrichers
//! de metadatos y el contrato `Persister` con sus estrategias (índice de
//! búsqueda, tabla relacional, cola de mensajes).
pub mod collector;
pub mod errors;
pub mod event;
pub mod extraction;
pub mod factory;
pub mod meta;
pub mod persist_task;
pub mod persister;

pub use collector::{AuditCollector, AuditTransaction, EntityToken, RecordChangeNotification, RecordDeleteNotification,
                    TrackingConfig};
pub use errors::AuditError;
pub use event::{AuditEvent, EventKind, Fields, KeyValue, Meta, PrimaryKey};
pub use extraction::{MetaExtraction, MetaPath, PrimaryKeyStrategy, Row};
pub use factory::EventFactory;
pub use meta::{ApplicationMetadata, EnricherChain, MetaEnricher, RequestMetadata};
pub use persist_task::PersistTask;
pub use persister::{FanOutPersister, Persister, QueuePersister, SearchIndexPersister, TablePersister};
