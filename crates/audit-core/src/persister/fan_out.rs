//! Entrega de un batch a varios persisters con fallos independientes.
//!
//! Un batch vacío no llega a ningún sink.

use log::error;

use super::Persister;
use crate::errors::AuditError;
use crate::event::AuditEvent;

/// Entrega el mismo batch a varios persisters.
///
/// No hay atomicidad entre sinks: cada persister corre aunque otro haya
/// fallado; al final se devuelve el primer error (los demás quedan en log).
#[derive(Default)]
pub struct FanOutPersister {
    persisters: Vec<Box<dyn Persister>>,
}

impl FanOutPersister {
    pub fn new(persisters: Vec<Box<dyn Persister>>) -> Self {
        Self { persisters }
    }

    pub fn push(&mut self, persister: Box<dyn Persister>) {
        self.persisters.push(persister);
    }

    pub fn len(&self) -> usize {
        self.persisters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persisters.is_empty()
    }
}

impl Persister for FanOutPersister {
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut first_error = None;
        for (i, persister) in self.persisters.iter().enumerate() {
            if let Err(e) = persister.log_events(events) {
                error!("fan-out sink #{i} failed for {} events: {e}", events.len());
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
