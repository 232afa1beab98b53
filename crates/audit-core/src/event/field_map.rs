//! Forma "field-map" de un evento: el objeto JSON plano que viaja por la cola
//! y que se guarda en el índice de búsqueda.
//!
//! Claves: `type, transaction, primary_key, source, parent_source,
//! @timestamp, meta, original, changed` (+ `display_value` sólo si existe).
//! `EventFactory` es la inversa exacta de `to_field_map`; ambos deben
//! cambiar juntos.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::AuditEvent;
use crate::errors::AuditError;

/// Formato legado aceptado al decodificar (`Y-m-d H:i:s`, asumido UTC).
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn to_field_map(event: &AuditEvent) -> Value {
    let mut map = Map::new();
    map.insert("type".into(), Value::from(event.kind().as_str()));
    map.insert("transaction".into(), Value::from(event.transaction_id()));
    map.insert("primary_key".into(), event.id().to_json());
    map.insert("source".into(), Value::from(event.source()));
    map.insert("parent_source".into(), event.parent_source().map(Value::from).unwrap_or(Value::Null));
    map.insert("@timestamp".into(), Value::from(format_timestamp(event.timestamp())));
    map.insert("meta".into(), Value::Object(event.meta().clone()));
    map.insert("original".into(), event.original().cloned().map(Value::Object).unwrap_or(Value::Null));
    map.insert("changed".into(), event.changed().cloned().map(Value::Object).unwrap_or(Value::Null));
    if let Some(display) = event.display_value() {
        map.insert("display_value".into(), Value::from(display));
    }
    Value::Object(map)
}

/// Lista de field-maps, en el orden del batch.
pub fn to_field_maps(events: &[AuditEvent]) -> Value {
    Value::Array(events.iter().map(to_field_map).collect())
}

/// Cuerpo de mensaje para la cola: arreglo JSON de field-maps.
pub fn encode_batch(events: &[AuditEvent]) -> Result<Vec<u8>, AuditError> {
    serde_json::to_vec(&to_field_maps(events)).map_err(|e| AuditError::Persistence(format!("encode batch: {e}")))
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AuditError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT).map(|naive| naive.and_utc())
                                                              .map_err(|e| AuditError::Decoding(format!("invalid @timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KeyValue;
    use serde_json::json;

    #[test]
    fn delete_field_map_has_null_changed() {
        let ev = AuditEvent::delete("tx-1", 2, "comments", None).unwrap().with_parent_source("articles");
        let map = to_field_map(&ev);
        assert_eq!(map["type"], json!("delete"));
        assert_eq!(map["changed"], Value::Null);
        assert_eq!(map["original"], Value::Null);
        assert_eq!(map["parent_source"], json!("articles"));
        assert!(map.get("display_value").is_none());
    }

    #[test]
    fn composite_key_is_written_as_list() {
        let ev = AuditEvent::update("tx-1", vec![KeyValue::Int(1), KeyValue::from("b")], "pairs", None, None).unwrap();
        assert_eq!(to_field_map(&ev)["primary_key"], json!([1, "b"]));
    }

    #[test]
    fn legacy_timestamps_are_accepted() {
        let ts = parse_timestamp("2017-10-18 18:56:09").unwrap();
        assert_eq!(format_timestamp(ts), "2017-10-18T18:56:09Z");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
