//! Enricher con los datos del request que disparó el cambio.

use serde_json::Value;

use super::{merge_missing, MetaEnricher};
use crate::errors::AuditError;
use crate::event::{AuditEvent, Meta};

/// Copia `ip`, `url` y `user` del request actual a cada evento del batch.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub ip: Option<String>,
    pub url: Option<String>,
    pub user: Option<Value>,
}

impl RequestMetadata {
    pub fn new(ip: impl Into<String>, url: impl Into<String>) -> Self {
        Self { ip: Some(ip.into()),
               url: Some(url.into()),
               user: None }
    }

    /// `user` puede ser un id numérico o un nombre.
    pub fn with_user(mut self, user: impl Into<Value>) -> Self {
        self.user = Some(user.into());
        self
    }

    fn as_meta(&self) -> Meta {
        let mut meta = Meta::new();
        meta.insert("ip".into(), self.ip.clone().map(Value::String).unwrap_or(Value::Null));
        meta.insert("url".into(), self.url.clone().map(Value::String).unwrap_or(Value::Null));
        meta.insert("user".into(), self.user.clone().unwrap_or(Value::Null));
        meta
    }
}

impl MetaEnricher for RequestMetadata {
    fn name(&self) -> &str {
        "request"
    }

    fn enrich(&self, events: &mut [AuditEvent]) -> Result<(), AuditError> {
        let meta = self.as_meta();
        for event in events.iter_mut() {
            merge_missing(event.meta_mut(), &meta);
        }
        Ok(())
    }
}
