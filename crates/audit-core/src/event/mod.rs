//! Modelo de eventos de auditoría y su forma field-map.

pub mod field_map;
mod types;

pub use field_map::{encode_batch, to_field_map, to_field_maps};
pub use types::{AuditEvent, EventKind, Fields, KeyValue, Meta, PrimaryKey};
