//! Reconstrucción de eventos a partir de su forma field-map.
//!
//! Usado por consumidores asíncronos (p.ej. el lector de la cola) que reciben
//! los eventos ya serializados. El despacho por `type` es un `match` cerrado
//! sobre `EventKind`; no hay registro abierto de clases.

use serde_json::{Map, Value};

use crate::errors::AuditError;
use crate::event::field_map::parse_timestamp;
use crate::event::{AuditEvent, EventKind, Fields, Meta, PrimaryKey};

#[derive(Debug, Default, Clone, Copy)]
pub struct EventFactory;

impl EventFactory {
    pub fn new() -> Self {
        Self
    }

    /// Convierte un field-map en `AuditEvent`. Sin reconstrucción parcial:
    /// cualquier campo requerido faltante o inválido es `Decoding`.
    pub fn create(&self, data: &Value) -> Result<AuditEvent, AuditError> {
        let map = data.as_object()
                      .ok_or_else(|| AuditError::Decoding("event field map must be a JSON object".into()))?;

        let kind: EventKind = required_str(map, "type")?.parse()?;
        let transaction = required_str(map, "transaction")?;
        let primary_key = PrimaryKey::from_json(required(map, "primary_key")?)?;
        let source = required_str(map, "source")?;
        let timestamp = parse_timestamp(required_str(map, "@timestamp")?)?;

        let mut event = match kind {
            EventKind::Create => AuditEvent::create(transaction,
                                                    primary_key,
                                                    source,
                                                    optional_fields(map, "changed")?,
                                                    optional_fields(map, "original")?),
            EventKind::Update => AuditEvent::update(transaction,
                                                    primary_key,
                                                    source,
                                                    optional_fields(map, "changed")?,
                                                    optional_fields(map, "original")?),
            EventKind::Delete => AuditEvent::delete(transaction, primary_key, source, optional_fields(map, "original")?),
        }.map_err(|e| AuditError::Decoding(e.to_string()))?;

        if let Some(parent) = optional_str(map, "parent_source")? {
            event = event.with_parent_source(parent);
        }
        if let Some(display) = optional_str(map, "display_value")? {
            event = event.with_display_value(display);
        }
        event = event.with_timestamp(timestamp);
        event.set_meta(optional_fields(map, "meta")?.unwrap_or_else(Meta::new));
        Ok(event)
    }

    /// Decodifica una lista; el primer error aborta (sin resultados parciales).
    pub fn create_many(&self, items: &[Value]) -> Result<Vec<AuditEvent>, AuditError> {
        items.iter().map(|item| self.create(item)).collect()
    }

    /// Decodifica el cuerpo de un mensaje de la cola (arreglo JSON).
    pub fn decode_batch(&self, payload: &[u8]) -> Result<Vec<AuditEvent>, AuditError> {
        let value: Value = serde_json::from_slice(payload)?;
        match value {
            Value::Array(items) => self.create_many(&items),
            _ => Err(AuditError::Decoding("event batch must be a JSON array".into())),
        }
    }
}

fn required<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Value, AuditError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(AuditError::Decoding(format!("missing required field '{key}'"))),
        Some(v) => Ok(v),
    }
}

fn required_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, AuditError> {
    required(map, key)?.as_str()
                       .ok_or_else(|| AuditError::Decoding(format!("field '{key}' must be a string")))
}

fn optional_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, AuditError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AuditError::Decoding(format!("field '{key}' must be a string"))),
    }
}

fn optional_fields(map: &Map<String, Value>, key: &str) -> Result<Option<Fields>, AuditError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(o)) => Ok(Some(o.clone())),
        // Serializadores que codifican un mapa vacío como lista vacía.
        Some(Value::Array(a)) if a.is_empty() => Ok(Some(Fields::new())),
        Some(_) => Err(AuditError::Decoding(format!("field '{key}' must be an object"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{to_field_map, KeyValue};
    use serde_json::json;

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn roundtrip_create_with_meta_and_parent() {
        let data = fields(json!({"title": "A new article", "author_id": 1}));
        let mut ev = AuditEvent::create("tx-1", 50, "articles", Some(data.clone()), Some(data)).unwrap()
                                                                                                .with_parent_source("authors");
        ev.meta_mut().insert("user".into(), json!("alice"));
        let back = EventFactory::new().create(&to_field_map(&ev)).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn roundtrip_update_without_meta_or_parent() {
        let ev = AuditEvent::update("tx-2",
                                    vec![KeyValue::Int(1), KeyValue::Int(2)],
                                    "pairs",
                                    Some(fields(json!({"title": "new"}))),
                                    Some(fields(json!({"title": "old"}))))
                 .unwrap();
        let back = EventFactory::new().create(&to_field_map(&ev)).unwrap();
        assert_eq!(back, ev);
        assert!(back.meta().is_empty());
        assert!(back.parent_source().is_none());
    }

    #[test]
    fn roundtrip_delete_with_and_without_snapshot() {
        let factory = EventFactory::new();
        let plain = AuditEvent::delete("tx-3", 2, "comments", None).unwrap();
        assert_eq!(factory.create(&to_field_map(&plain)).unwrap(), plain);

        let snap = AuditEvent::delete("tx-3", 3, "comments", Some(fields(json!({"body": "gone"})))).unwrap()
                                                                                                   .with_display_value("comment #3");
        assert_eq!(factory.create(&to_field_map(&snap)).unwrap(), snap);
    }

    #[test]
    fn timestamp_is_taken_from_the_map() {
        let data = json!({
            "type": "update", "transaction": "tx", "primary_key": 1, "source": "articles",
            "@timestamp": "2016-10-19T10:00:00+02:00", "meta": null,
            "original": {"title": "a"}, "changed": {"title": "b"}
        });
        let ev = EventFactory::new().create(&data).unwrap();
        assert_eq!(ev.timestamp().to_rfc3339(), "2016-10-19T08:00:00+00:00");
        assert!(ev.meta().is_empty());
    }

    #[test]
    fn unknown_type_is_a_decoding_error() {
        let data = json!({
            "type": "merge", "transaction": "tx", "primary_key": 1, "source": "articles",
            "@timestamp": "2016-10-19T10:00:00Z"
        });
        assert!(matches!(EventFactory::new().create(&data), Err(AuditError::Decoding(_))));
    }

    #[test]
    fn missing_required_fields_are_decoding_errors() {
        let factory = EventFactory::new();
        for key in ["type", "transaction", "primary_key", "source", "@timestamp"] {
            let mut data = json!({
                "type": "create", "transaction": "tx", "primary_key": 1, "source": "articles",
                "@timestamp": "2016-10-19T10:00:00Z", "changed": {"a": 1}, "original": {"a": 1}
            });
            data.as_object_mut().unwrap().remove(key);
            assert!(matches!(factory.create(&data), Err(AuditError::Decoding(_))), "missing {key}");
        }
    }

    #[test]
    fn decode_batch_requires_an_array() {
        let factory = EventFactory::new();
        assert!(factory.decode_batch(b"{}").is_err());
        assert!(factory.decode_batch(b"[]").unwrap().is_empty());
    }
}
