//! Errores del core de auditoría.
//!
//! Taxonomía común a todos los persisters:
//! - `Configuration`: opción faltante o inválida, se detecta al construir.
//! - `Connection`: sink inalcanzable. No se reintenta aquí; sube al caller.
//! - `Persistence`: el sink rechazó un registro (o un batch).
//! - `Decoding`: no se puede reconstruir un evento desde su forma serializada.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum AuditError {
    #[error("configuration error: {0}")] Configuration(String),
    #[error("connection error: {0}")] Connection(String),
    #[error("persistence error: {0}")] Persistence(String),
    #[error("decoding error: {0}")] Decoding(String),
    #[error("enrichment error: {0}")] Enrichment(String),
    #[error("invalid event: {0}")] InvalidEvent(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Decoding(e.to_string())
    }
}
