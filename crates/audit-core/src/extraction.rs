//! Extracción de un `AuditEvent` a columnas planas para almacenamiento
//! relacional.
//!
//! Tres estrategias independientes:
//! - campos básicos (`transaction`, `type`, `source`, ..., `created`), con o
//!   sin serialización JSON de `original`/`changed`;
//! - clave primaria (`PrimaryKeyStrategy`);
//! - metadatos (`MetaExtraction`), con lookup por ruta con puntos.
//!
//! El orden de las columnas en `Row` es el orden de inserción; los loggers
//! lo usan para volcar filas fallidas de forma legible.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::errors::AuditError;
use crate::event::field_map::format_timestamp;
use crate::event::{AuditEvent, Fields};

/// Fila plana `columna -> valor`.
pub type Row = IndexMap<String, Value>;

/// Cómo se guarda la clave primaria de la entidad auditada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryKeyStrategy {
    /// Escalar tal cual; compuesta como JSON en una sola columna.
    #[default]
    Automatic,
    /// Escalar tal cual; compuesta en `primary_key_0`, `primary_key_1`, ...
    Properties,
    /// El valor nativo (escalar o lista) sin transformar.
    Raw,
    /// Siempre JSON, sin importar la aridad.
    Serialized,
}

impl PrimaryKeyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryKeyStrategy::Automatic => "automatic",
            PrimaryKeyStrategy::Properties => "properties",
            PrimaryKeyStrategy::Raw => "raw",
            PrimaryKeyStrategy::Serialized => "serialized",
        }
    }
}

impl fmt::Display for PrimaryKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimaryKeyStrategy {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic" => Ok(PrimaryKeyStrategy::Automatic),
            "properties" => Ok(PrimaryKeyStrategy::Properties),
            "raw" => Ok(PrimaryKeyStrategy::Raw),
            "serialized" => Ok(PrimaryKeyStrategy::Serialized),
            other => Err(AuditError::Configuration(format!("unknown primary key extraction strategy '{other}'"))),
        }
    }
}

/// Ruta dentro de `meta` (con puntos) y nombre de la columna destino.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaPath {
    pub path: String,
    pub alias: String,
}

impl MetaPath {
    /// La ruta se usa también como nombre de columna.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self { alias: path.clone(),
               path }
    }

    pub fn aliased(path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self { path: path.into(),
               alias: alias.into() }
    }
}

/// Qué metadatos se extraen a columnas propias.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MetaExtraction {
    /// `meta` completo en una sola columna.
    #[default]
    None,
    /// Cada clave de primer nivel en su propia columna.
    All,
    /// Sólo las rutas indicadas.
    Paths(Vec<MetaPath>),
}

impl FromStr for MetaExtraction {
    type Err = AuditError;

    /// `false`/vacío, `true`, o lista separada por comas de `ruta` o
    /// `ruta=alias`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "" | "false" | "0" => return Ok(MetaExtraction::None),
            "true" | "1" => return Ok(MetaExtraction::All),
            _ => {}
        }
        let mut paths = Vec::new();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let path = match item.split_once('=') {
                Some((path, alias)) if !path.trim().is_empty() && !alias.trim().is_empty() => {
                    MetaPath::aliased(path.trim(), alias.trim())
                }
                Some(_) => return Err(AuditError::Configuration(format!("invalid meta field mapping '{item}'"))),
                None => MetaPath::new(item),
            };
            paths.push(path);
        }
        Ok(MetaExtraction::Paths(paths))
    }
}

/// JSON de un valor; `null` se conserva como `null` (no como texto "null").
pub fn serialize_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

fn fields_value(fields: Option<&Fields>, serialize: bool) -> Value {
    let raw = fields.cloned().map(Value::Object).unwrap_or(Value::Null);
    if serialize {
        serialize_value(&raw)
    } else {
        raw
    }
}

/// Columnas comunes a todo evento.
pub fn extract_basic_fields(event: &AuditEvent, serialize: bool) -> Row {
    let mut row = Row::new();
    row.insert("transaction".into(), Value::from(event.transaction_id()));
    row.insert("type".into(), Value::from(event.kind().as_str()));
    row.insert("source".into(), Value::from(event.source()));
    row.insert("parent_source".into(), event.parent_source().map(Value::from).unwrap_or(Value::Null));
    row.insert("original".into(), fields_value(event.original(), serialize));
    row.insert("changed".into(), fields_value(event.changed(), serialize));
    row.insert("created".into(), Value::from(format_timestamp(event.timestamp())));
    row
}

pub fn extract_primary_key_fields(event: &AuditEvent, strategy: PrimaryKeyStrategy) -> Row {
    let mut row = Row::new();
    let id = event.id();
    match strategy {
        PrimaryKeyStrategy::Automatic => {
            let value = match id.values().as_slice() {
                [single] => single.to_json(),
                _ => serialize_value(&id.to_json()),
            };
            row.insert("primary_key".into(), value);
        }
        PrimaryKeyStrategy::Properties => match id.values().as_slice() {
            [single] => {
                row.insert("primary_key".into(), single.to_json());
            }
            values => {
                for (i, v) in values.iter().enumerate() {
                    row.insert(format!("primary_key_{i}"), v.to_json());
                }
            }
        },
        PrimaryKeyStrategy::Raw => {
            row.insert("primary_key".into(), id.to_json());
        }
        PrimaryKeyStrategy::Serialized => {
            row.insert("primary_key".into(), serialize_value(&id.to_json()));
        }
    }
    row
}

/// Columnas de metadatos. `meta` queda como columna residual (serializada
/// si `serialize`), vaciada o recortada según `unset_extracted`.
pub fn extract_meta_fields(event: &AuditEvent, fields: &MetaExtraction, unset_extracted: bool, serialize: bool) -> Row {
    let mut meta = event.meta().clone();
    let mut row = Row::new();
    let finish = |meta: Map<String, Value>| {
        let value = Value::Object(meta);
        if serialize {
            serialize_value(&value)
        } else {
            value
        }
    };

    if meta.is_empty() {
        row.insert("meta".into(), finish(meta));
        return row;
    }

    match fields {
        MetaExtraction::None => {
            row.insert("meta".into(), finish(meta));
        }
        MetaExtraction::All => {
            // `meta` primero: una clave "meta" dentro de los metadatos no la pisa.
            let residual = if unset_extracted { Map::new() } else { meta.clone() };
            row.insert("meta".into(), finish(residual));
            for (k, v) in meta.into_iter() {
                row.entry(k).or_insert(v);
            }
        }
        MetaExtraction::Paths(paths) => {
            let snapshot = Value::Object(meta.clone());
            let mut extracted = Vec::with_capacity(paths.len());
            for p in paths.iter() {
                let value = path_get(&snapshot, &p.path).cloned().unwrap_or(Value::Null);
                extracted.push((p.alias.clone(), value));
                if unset_extracted {
                    path_remove(&mut meta, &p.path);
                }
            }
            row.insert("meta".into(), finish(meta));
            for (alias, value) in extracted {
                row.insert(alias, value);
            }
        }
    }
    row
}

/// Lookup por ruta con puntos (`user.id`, `tags.0`).
pub fn path_get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Elimina la hoja indicada por la ruta. Devuelve si existía.
pub fn path_remove(map: &mut Map<String, Value>, path: &str) -> bool {
    match path.split_once('.') {
        None => map.remove(path).is_some(),
        Some((head, rest)) => match map.get_mut(head) {
            Some(Value::Object(inner)) => path_remove(inner, rest),
            Some(Value::Array(items)) => remove_in_array(items, rest),
            _ => false,
        },
    }
}

fn remove_in_array(items: &mut Vec<Value>, path: &str) -> bool {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let Ok(index) = head.parse::<usize>() else { return false };
    match rest {
        None if index < items.len() => {
            items.remove(index);
            true
        }
        None => false,
        Some(rest) => match items.get_mut(index) {
            Some(Value::Object(inner)) => path_remove(inner, rest),
            Some(Value::Array(nested)) => remove_in_array(nested, rest),
            _ => false,
        },
    }
}
