//! Tipos del evento de auditoría y estructura `AuditEvent`.
//!
//! Rol en el flujo:
//! - La capa de detección de cambios construye un `AuditEvent` en el momento
//!   en que observa la mutación (antes del commit).
//! - El evento se encola en la `AuditTransaction` activa, los enrichers le
//!   agregan `meta` al hacer flush y finalmente un `Persister` lo escribe.
//! - Fuera de `meta`, el evento es inmutable tras su construcción: el tipo
//!   (`EventKind`) se fija en el constructor y nunca se reasigna.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AuditError;

/// Valores de campos de una entidad (`campo -> valor`).
pub type Fields = Map<String, Value>;

/// Anotaciones libres adjuntas al evento (ip, url, user, app_name...).
pub type Meta = Map<String, Value>;

/// Tipo de cambio registrado. Conjunto cerrado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    /// Nombre estable usado en el formato de cable y en la columna `type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(EventKind::Create),
            "update" => Ok(EventKind::Update),
            "delete" => Ok(EventKind::Delete),
            other => Err(AuditError::Decoding(format!("unknown event type '{other}'"))),
        }
    }
}

/// Valor escalar de una clave primaria.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl KeyValue {
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Int(i) => Value::from(*i),
            KeyValue::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, AuditError> {
        match value {
            Value::String(s) => Ok(KeyValue::Text(s.clone())),
            Value::Number(n) => n.as_i64()
                                 .map(KeyValue::Int)
                                 .ok_or_else(|| AuditError::Decoding(format!("primary key is not an integer: {n}"))),
            other => Err(AuditError::Decoding(format!("unsupported primary key value: {other}"))),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(v as i64)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(v)
    }
}

/// Clave primaria de la entidad afectada: escalar o compuesta (lista
/// ordenada).
///
/// Regla de normalización: una clave compuesta de un solo elemento colapsa al
/// escalar. Todos los constructores de `AuditEvent` la aplican, de modo que
/// `AuditEvent::id()` nunca devuelve `Composite` de largo 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Composite(Vec<KeyValue>),
    Scalar(KeyValue),
}

impl PrimaryKey {
    pub fn normalized(self) -> Self {
        match self {
            PrimaryKey::Composite(mut values) if values.len() == 1 => PrimaryKey::Scalar(values.remove(0)),
            other => other,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, PrimaryKey::Composite(_))
    }

    /// Valores de la clave como lista (un escalar produce una lista de uno).
    pub fn values(&self) -> Vec<KeyValue> {
        match self {
            PrimaryKey::Scalar(v) => vec![v.clone()],
            PrimaryKey::Composite(values) => values.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PrimaryKey::Scalar(v) => v.to_json(),
            PrimaryKey::Composite(values) => Value::Array(values.iter().map(KeyValue::to_json).collect()),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, AuditError> {
        match value {
            Value::Array(items) => {
                let values = items.iter().map(KeyValue::from_json).collect::<Result<Vec<_>, _>>()?;
                Ok(PrimaryKey::Composite(values).normalized())
            }
            other => Ok(PrimaryKey::Scalar(KeyValue::from_json(other)?)),
        }
    }
}

impl From<KeyValue> for PrimaryKey {
    fn from(v: KeyValue) -> Self {
        PrimaryKey::Scalar(v)
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        PrimaryKey::Scalar(v.into())
    }
}

impl From<i32> for PrimaryKey {
    fn from(v: i32) -> Self {
        PrimaryKey::Scalar(v.into())
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        PrimaryKey::Scalar(v.into())
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        PrimaryKey::Scalar(v.into())
    }
}

impl From<Vec<KeyValue>> for PrimaryKey {
    fn from(values: Vec<KeyValue>) -> Self {
        PrimaryKey::Composite(values).normalized()
    }
}

impl<T: Into<KeyValue>> FromIterator<T> for PrimaryKey {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        PrimaryKey::Composite(iter.into_iter().map(Into::into).collect()).normalized()
    }
}

/// Un cambio (create/update/delete) sobre una entidad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    kind: EventKind,
    transaction_id: String,
    id: PrimaryKey,
    source: String,
    parent_source: Option<String>,
    changed: Option<Fields>,
    original: Option<Fields>,
    timestamp: DateTime<Utc>,
    meta: Meta,
    display_value: Option<String>,
}

impl AuditEvent {
    /// Evento de alta. `original` se alinea a las claves de `changed`.
    pub fn create(transaction_id: impl Into<String>,
                  id: impl Into<PrimaryKey>,
                  source: impl Into<String>,
                  changed: Option<Fields>,
                  original: Option<Fields>)
                  -> Result<Self, AuditError> {
        Self::build(EventKind::Create, transaction_id.into(), id.into(), source.into(), changed, original)
    }

    /// Evento de modificación. Mismas reglas que `create`.
    pub fn update(transaction_id: impl Into<String>,
                  id: impl Into<PrimaryKey>,
                  source: impl Into<String>,
                  changed: Option<Fields>,
                  original: Option<Fields>)
                  -> Result<Self, AuditError> {
        Self::build(EventKind::Update, transaction_id.into(), id.into(), source.into(), changed, original)
    }

    /// Evento de baja. Nunca lleva `changed`; `snapshot` es la foto previa
    /// (best-effort) de los campos borrados, o `None`.
    pub fn delete(transaction_id: impl Into<String>,
                  id: impl Into<PrimaryKey>,
                  source: impl Into<String>,
                  snapshot: Option<Fields>)
                  -> Result<Self, AuditError> {
        let event = AuditEvent { kind: EventKind::Delete,
                                 transaction_id: transaction_id.into(),
                                 id: id.into().normalized(),
                                 source: source.into(),
                                 parent_source: None,
                                 changed: None,
                                 original: snapshot,
                                 timestamp: Utc::now(),
                                 meta: Meta::new(),
                                 display_value: None };
        event.validate()?;
        Ok(event)
    }

    fn build(kind: EventKind,
             transaction_id: String,
             id: PrimaryKey,
             source: String,
             changed: Option<Fields>,
             original: Option<Fields>)
             -> Result<Self, AuditError> {
        let original = match (&changed, original) {
            (Some(changed), original) => Some(align_original(changed, original.as_ref())),
            (None, None) => None,
            (None, Some(_)) => {
                return Err(AuditError::InvalidEvent(format!("{kind} event for '{source}' has original values without changed values")))
            }
        };
        let event = AuditEvent { kind,
                                 transaction_id,
                                 id: id.normalized(),
                                 source,
                                 parent_source: None,
                                 changed,
                                 original,
                                 timestamp: Utc::now(),
                                 meta: Meta::new(),
                                 display_value: None };
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), AuditError> {
        if self.transaction_id.is_empty() {
            return Err(AuditError::InvalidEvent("transaction id must not be empty".into()));
        }
        if self.source.is_empty() {
            return Err(AuditError::InvalidEvent("source name must not be empty".into()));
        }
        if self.kind == EventKind::Delete && self.changed.is_some() {
            return Err(AuditError::InvalidEvent("delete events carry no changed values".into()));
        }
        if let (Some(changed), Some(original)) = (&self.changed, &self.original) {
            if changed.len() != original.len() || changed.keys().any(|k| !original.contains_key(k)) {
                return Err(AuditError::InvalidEvent("changed and original fields differ".into()));
            }
        }
        Ok(())
    }

    /// Fija la colección que disparó este cambio como efecto secundario.
    pub fn with_parent_source(mut self, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        self.parent_source = if parent.is_empty() { None } else { Some(parent) };
        self
    }

    pub fn with_display_value(mut self, display: impl Into<String>) -> Self {
        self.display_value = Some(display.into());
        self
    }

    /// Sólo para reconstrucción (factory): el timestamp normal es "ahora".
    pub(crate) fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn id(&self) -> &PrimaryKey {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parent_source(&self) -> Option<&str> {
        self.parent_source.as_deref()
    }

    pub fn changed(&self) -> Option<&Fields> {
        self.changed.as_ref()
    }

    pub fn original(&self) -> Option<&Fields> {
        self.original.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Única superficie mutable: los enrichers anotan después de construir.
    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    pub fn set_meta(&mut self, meta: Meta) {
        self.meta = meta;
    }

    pub fn display_value(&self) -> Option<&str> {
        self.display_value.as_deref()
    }

    /// Serialización estructural para transporte en proceso.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AuditError> {
        serde_json::to_vec(self).map_err(|e| AuditError::InvalidEvent(format!("serialize: {e}")))
    }

    /// Inversa de `to_bytes`. Revalida las invariantes del evento.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuditError> {
        let mut event: AuditEvent = serde_json::from_slice(bytes)?;
        event.id = event.id.normalized();
        event.validate().map_err(|e| AuditError::Decoding(e.to_string()))?;
        Ok(event)
    }
}

// Cada campo de `changed` tiene su par en `original` (null si no se conoce).
fn align_original(changed: &Fields, original: Option<&Fields>) -> Fields {
    changed.keys()
           .map(|k| {
               let v = original.and_then(|o| o.get(k)).cloned().unwrap_or(Value::Null);
               (k.clone(), v)
           })
           .collect()
}
