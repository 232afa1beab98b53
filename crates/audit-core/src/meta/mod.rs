//! Enrichers de metadatos.
//!
//! Un `MetaEnricher` recibe el batch completo de una transacción y fusiona
//! pares clave/valor en el `meta` de cada evento. Los valores ya presentes en
//! el evento nunca se reemplazan (ver `merge_missing`).
//!
//! `EnricherChain` los aplica en orden de registro. Si uno falla se registra
//! un `warn!` y se continúa con el siguiente: el batch nunca se descarta por
//! una anotación.

mod application;
mod merge;
mod request;

use log::warn;

use crate::errors::AuditError;
use crate::event::AuditEvent;

pub use application::ApplicationMetadata;
pub use merge::merge_missing;
pub use request::RequestMetadata;

/// Trait para enrichers de metadatos.
pub trait MetaEnricher: Send + Sync {
    /// Nombre corto para logs.
    fn name(&self) -> &str;

    /// Anota los eventos del batch. No debe quitar claves existentes.
    fn enrich(&self, events: &mut [AuditEvent]) -> Result<(), AuditError>;
}

/// Lista ordenada de enrichers.
#[derive(Default)]
pub struct EnricherChain {
    enrichers: Vec<Box<dyn MetaEnricher>>,
}

impl EnricherChain {
    pub fn new() -> Self {
        Self { enrichers: vec![] }
    }

    pub fn with_enrichers(enrichers: Vec<Box<dyn MetaEnricher>>) -> Self {
        Self { enrichers }
    }

    pub fn push(&mut self, enricher: Box<dyn MetaEnricher>) {
        self.enrichers.push(enricher);
    }

    pub fn len(&self) -> usize {
        self.enrichers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }

    /// Aplica todos los enrichers. Devuelve cuántos fallaron.
    pub fn apply(&self, events: &mut [AuditEvent]) -> usize {
        let mut failures = 0;
        for enricher in self.enrichers.iter() {
            if let Err(e) = enricher.enrich(events) {
                failures += 1;
                warn!("enricher '{}' failed, batch continues: {e}", enricher.name());
            }
        }
        failures
    }
}

impl std::fmt::Debug for EnricherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.enrichers.iter().map(|e| e.name())).finish()
    }
}
