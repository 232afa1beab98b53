//! Enricher con la identidad estática de la aplicación.

use serde_json::Value;

use super::{merge_missing, MetaEnricher};
use crate::errors::AuditError;
use crate::event::{AuditEvent, Meta};

#[derive(Debug, Clone)]
pub struct ApplicationMetadata {
    data: Meta,
}

impl ApplicationMetadata {
    pub fn new(app_name: impl Into<String>) -> Self {
        let mut data = Meta::new();
        data.insert("app_name".into(), Value::String(app_name.into()));
        Self { data }
    }

    /// Datos extra copiados a cada evento. `app_name` no se reemplaza.
    pub fn with_data(mut self, extra: Meta) -> Self {
        merge_missing(&mut self.data, &extra);
        self
    }

    pub fn data(&self) -> &Meta {
        &self.data
    }
}

impl MetaEnricher for ApplicationMetadata {
    fn name(&self) -> &str {
        "application"
    }

    fn enrich(&self, events: &mut [AuditEvent]) -> Result<(), AuditError> {
        for event in events.iter_mut() {
            merge_missing(event.meta_mut(), &self.data);
        }
        Ok(())
    }
}
