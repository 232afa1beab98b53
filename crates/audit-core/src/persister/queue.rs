//! Persister que publica el batch en un message broker.
//!
//! Desacopla la escritura final de la latencia del camino de detección: un
//! consumidor aparte decodifica el mensaje con `EventFactory` y lo persiste
//! con otro persister (ver `PersistTask`).

use std::sync::Arc;

use log::debug;

use super::Persister;
use crate::errors::AuditError;
use crate::event::{encode_batch, AuditEvent};

pub const DEFAULT_EXCHANGE: &str = "audits.persist";
pub const DEFAULT_ROUTING_KEY: &str = "store";

/// Modo de entrega AMQP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    Transient,
    /// Mensaje persistido en disco por el broker.
    #[default]
    Persistent,
}

impl DeliveryMode {
    pub fn as_u8(&self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }

    pub fn from_u8(mode: u8) -> Result<Self, AuditError> {
        match mode {
            1 => Ok(DeliveryMode::Transient),
            2 => Ok(DeliveryMode::Persistent),
            other => Err(AuditError::Configuration(format!("invalid delivery mode {other} (expected 1 or 2)"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub delivery_mode: DeliveryMode,
    pub content_type: String,
}

/// Conexión opaca al broker.
pub trait MessagePublisher: Send + Sync {
    fn publish(&self, exchange: &str, routing_key: &str, body: &[u8], properties: &MessageProperties) -> Result<(), AuditError>;
}

impl<M: MessagePublisher + ?Sized> MessagePublisher for Arc<M> {
    fn publish(&self, exchange: &str, routing_key: &str, body: &[u8], properties: &MessageProperties) -> Result<(), AuditError> {
        (**self).publish(exchange, routing_key, body, properties)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePersisterConfig {
    pub exchange: String,
    pub routing_key: String,
    pub delivery_mode: DeliveryMode,
}

impl Default for QueuePersisterConfig {
    fn default() -> Self {
        Self { exchange: DEFAULT_EXCHANGE.to_string(),
               routing_key: DEFAULT_ROUTING_KEY.to_string(),
               delivery_mode: DeliveryMode::Persistent }
    }
}

pub struct QueuePersister<M: MessagePublisher> {
    publisher: M,
    config: QueuePersisterConfig,
}

impl<M: MessagePublisher> QueuePersister<M> {
    pub fn new(publisher: M, config: QueuePersisterConfig) -> Result<Self, AuditError> {
        if config.exchange.trim().is_empty() {
            return Err(AuditError::Configuration("You need to configure an 'exchange' to publish your events.".into()));
        }
        Ok(Self { publisher, config })
    }

    pub fn config(&self) -> &QueuePersisterConfig {
        &self.config
    }

    pub fn publisher(&self) -> &M {
        &self.publisher
    }
}

impl<M: MessagePublisher> Persister for QueuePersister<M> {
    fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        if events.is_empty() {
            return Ok(());
        }
        let body = encode_batch(events)?;
        let properties = MessageProperties { delivery_mode: self.config.delivery_mode,
                                             content_type: "application/json".to_string() };
        debug!("publish:start exchange={} routing={} events={} bytes={}",
               self.config.exchange,
               self.config.routing_key,
               events.len(),
               body.len());
        self.publisher.publish(&self.config.exchange, &self.config.routing_key, &body, &properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::EventFactory;
    use crate::persister::InMemoryPublisher;
    use serde_json::json;

    fn sample_events() -> Vec<AuditEvent> {
        let data = json!({"title": "A new article", "body": "article body", "author_id": 1, "published": "Y"});
        let data = data.as_object().cloned().unwrap();
        vec![AuditEvent::create("1234", 50, "articles", Some(data.clone()), Some(data)).unwrap(),
             AuditEvent::delete("1234", 2, "comments", None).unwrap().with_parent_source("articles")]
    }

    #[test]
    fn publishes_one_message_with_defaults() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let persister = QueuePersister::new(publisher.clone(), QueuePersisterConfig::default()).unwrap();
        let events = sample_events();
        persister.log_events(&events).unwrap();

        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].exchange, "audits.persist");
        assert_eq!(messages[0].routing_key, "store");
        assert_eq!(messages[0].properties.delivery_mode.as_u8(), 2);
        // el consumidor reconstruye exactamente el batch publicado
        let decoded = EventFactory::new().decode_batch(&messages[0].body).unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn overrides_are_honoured() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let config = QueuePersisterConfig { exchange: "bar".into(),
                                            routing_key: "foo".into(),
                                            delivery_mode: DeliveryMode::from_u8(1).unwrap() };
        QueuePersister::new(publisher.clone(), config).unwrap().log_events(&sample_events()).unwrap();
        let messages = publisher.messages();
        assert_eq!(messages[0].exchange, "bar");
        assert_eq!(messages[0].routing_key, "foo");
        assert_eq!(messages[0].properties.delivery_mode, DeliveryMode::Transient);
    }

    #[test]
    fn empty_batch_publishes_nothing() {
        let publisher = Arc::new(InMemoryPublisher::new());
        QueuePersister::new(publisher.clone(), QueuePersisterConfig::default()).unwrap().log_events(&[]).unwrap();
        assert!(publisher.messages().is_empty());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = QueuePersisterConfig { exchange: " ".into(), ..Default::default() };
        assert!(matches!(QueuePersister::new(InMemoryPublisher::new(), config), Err(AuditError::Configuration(_))));
        assert!(DeliveryMode::from_u8(3).is_err());
    }
}
