//! Colector por transacción lógica.
//!
//! El colaborador que detecta mutaciones (hooks del ORM) abre una
//! `AuditTransaction` por cada save/delete de nivel superior y le notifica
//! cada entidad tocada, incluidas las cascadas. La transacción:
//!
//! - asigna un id UUIDv4 en la primera mutación y lo comparte con todas las
//!   siguientes;
//! - guarda a lo sumo un evento por entidad (`EntityToken`): volver a
//!   guardar la misma instancia reemplaza su evento en el mismo lugar;
//! - en `commit` pasa el batch, en orden de inserción, por los enrichers y
//!   luego por el persister en una única llamada `log_events`.
//!
//! Un `abort` (o soltar la transacción sin commit) descarta la cola: nunca
//! hay persistencia parcial de una operación.

use indexmap::IndexMap;
use log::{debug, error};
use uuid::Uuid;

use crate::errors::AuditError;
use crate::event::{AuditEvent, Fields, PrimaryKey};
use crate::meta::EnricherChain;
use crate::persister::Persister;

/// Campos que nunca se auditan salvo configuración explícita.
pub const DEFAULT_DENY_LIST: [&str; 2] = ["created", "modified"];

/// Identidad de una instancia de entidad dentro de una operación. La asigna
/// el host (p.ej. la dirección o el índice de la entidad en su arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityToken(pub u64);

/// Qué campos de una entidad se rastrean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Vacía: columnas del esquema + propiedades de asociación.
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { allow_list: vec![],
               deny_list: DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect() }
    }
}

impl TrackingConfig {
    pub fn tracked_fields(&self, schema_columns: &[String], association_properties: &[String]) -> Vec<String> {
        let base: Vec<String> = if self.allow_list.is_empty() {
            schema_columns.iter().chain(association_properties.iter()).cloned().collect()
        } else {
            self.allow_list.clone()
        };
        base.into_iter().filter(|f| !self.deny_list.contains(f)).collect()
    }

    fn strip_denied(&self, mut fields: Fields) -> Fields {
        fields.retain(|k, _| !self.deny_list.contains(k));
        fields
    }
}

/// Una entidad fue guardada (insert o update).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChangeNotification {
    pub token: EntityToken,
    pub source: String,
    pub primary_key: PrimaryKey,
    pub is_new: bool,
    /// Valores asignados durante la operación.
    pub dirty: Fields,
    /// Valores previos conocidos; un campo sin previo usa el valor nuevo.
    pub original: Fields,
    pub schema_columns: Vec<String>,
    /// Propiedades que representan el enlace a una entidad asociada.
    pub association_properties: Vec<String>,
    pub parent_source: Option<String>,
    pub display_value: Option<String>,
}

impl RecordChangeNotification {
    /// Sin allow-list en `TrackingConfig`, los campos rastreados salen de
    /// `with_schema_columns` (y de las asociaciones). Una notificación sin
    /// columnas de esquema no registra ningún cambio.
    pub fn new(token: EntityToken, source: impl Into<String>, primary_key: impl Into<PrimaryKey>, is_new: bool) -> Self {
        Self { token,
               source: source.into(),
               primary_key: primary_key.into(),
               is_new,
               dirty: Fields::new(),
               original: Fields::new(),
               schema_columns: vec![],
               association_properties: vec![],
               parent_source: None,
               display_value: None }
    }

    pub fn with_dirty(mut self, dirty: Fields) -> Self {
        self.dirty = dirty;
        self
    }

    pub fn with_original(mut self, original: Fields) -> Self {
        self.original = original;
        self
    }

    pub fn with_schema_columns<I, S>(mut self, columns: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.schema_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_association_properties<I, S>(mut self, properties: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.association_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent_source(mut self, parent: impl Into<String>) -> Self {
        self.parent_source = Some(parent.into());
        self
    }

    pub fn with_display_value(mut self, display: impl Into<String>) -> Self {
        self.display_value = Some(display.into());
        self
    }
}

/// Una entidad fue borrada.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDeleteNotification {
    pub token: EntityToken,
    pub source: String,
    pub primary_key: PrimaryKey,
    /// Campos de la entidad antes del borrado, si el host los tiene.
    pub snapshot: Option<Fields>,
    pub parent_source: Option<String>,
}

impl RecordDeleteNotification {
    pub fn new(token: EntityToken, source: impl Into<String>, primary_key: impl Into<PrimaryKey>) -> Self {
        Self { token,
               source: source.into(),
               primary_key: primary_key.into(),
               snapshot: None,
               parent_source: None }
    }

    pub fn with_snapshot(mut self, snapshot: Fields) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_parent_source(mut self, parent: impl Into<String>) -> Self {
        self.parent_source = Some(parent.into());
        self
    }
}

/// Punto de entrada del host: persister y enrichers inyectados.
pub struct AuditCollector<P: Persister> {
    persister: P,
    enrichers: EnricherChain,
    tracking: TrackingConfig,
}

impl<P: Persister> AuditCollector<P> {
    pub fn new(persister: P) -> Self {
        Self { persister,
               enrichers: EnricherChain::new(),
               tracking: TrackingConfig::default() }
    }

    pub fn with_enrichers(mut self, enrichers: EnricherChain) -> Self {
        self.enrichers = enrichers;
        self
    }

    pub fn with_tracking(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn persister(&self) -> &P {
        &self.persister
    }

    pub fn tracking(&self) -> &TrackingConfig {
        &self.tracking
    }

    /// Abre la cola de una operación de nivel superior.
    pub fn begin(&self) -> AuditTransaction<'_, P> {
        AuditTransaction { collector: self,
                           transaction_id: None,
                           queue: IndexMap::new() }
    }
}

/// Cola de eventos de una operación en curso. No se comparte entre hilos.
pub struct AuditTransaction<'c, P: Persister> {
    collector: &'c AuditCollector<P>,
    transaction_id: Option<String>,
    queue: IndexMap<EntityToken, AuditEvent>,
}

impl<'c, P: Persister> AuditTransaction<'c, P> {
    /// `None` hasta la primera mutación notificada.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    fn ensure_transaction_id(&mut self) -> String {
        self.transaction_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    /// Calcula el diff y encola el evento. Devuelve `false` si no hubo
    /// cambios rastreables (no se encola nada).
    pub fn record_save(&mut self, change: RecordChangeNotification) -> Result<bool, AuditError> {
        let transaction_id = self.ensure_transaction_id();
        let tracking = &self.collector.tracking;
        let tracked = tracking.tracked_fields(&change.schema_columns, &change.association_properties);
        if tracked.is_empty() && !change.dirty.is_empty() {
            debug!("record_save: no tracked fields for '{}' ({} dirty ignored, schema columns missing?)",
                   change.source,
                   change.dirty.len());
        }

        let mut changed = Fields::new();
        for (field, value) in change.dirty.iter() {
            if !tracked.contains(field) || change.association_properties.contains(field) {
                continue;
            }
            // En un update, reasignar el mismo valor no es un cambio.
            if !change.is_new && change.original.get(field) == Some(value) {
                continue;
            }
            changed.insert(field.clone(), value.clone());
        }
        if changed.is_empty() {
            return Ok(false);
        }

        let original: Fields = changed.iter()
                                      .map(|(field, value)| {
                                          let before = change.original.get(field).unwrap_or(value);
                                          (field.clone(), before.clone())
                                      })
                                      .collect();

        let mut event = if change.is_new {
            AuditEvent::create(transaction_id, change.primary_key, change.source, Some(changed), Some(original))?
        } else {
            AuditEvent::update(transaction_id, change.primary_key, change.source, Some(changed), Some(original))?
        };
        if let Some(parent) = change.parent_source {
            event = event.with_parent_source(parent);
        }
        if let Some(display) = change.display_value {
            event = event.with_display_value(display);
        }
        self.queue.insert(change.token, event);
        Ok(true)
    }

    pub fn record_delete(&mut self, deletion: RecordDeleteNotification) -> Result<(), AuditError> {
        let transaction_id = self.ensure_transaction_id();
        let snapshot = deletion.snapshot.map(|s| self.collector.tracking.strip_denied(s));
        let mut event = AuditEvent::delete(transaction_id, deletion.primary_key, deletion.source, snapshot)?;
        if let Some(parent) = deletion.parent_source {
            event = event.with_parent_source(parent);
        }
        self.queue.insert(deletion.token, event);
        Ok(())
    }

    /// Eventos encolados, en orden de inserción.
    pub fn events(&self) -> impl Iterator<Item = &AuditEvent> {
        self.queue.values()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enriquece y persiste el batch. Devuelve cuántos eventos se enviaron.
    pub fn commit(self) -> Result<usize, AuditError> {
        let collector = self.collector;
        let transaction_id = self.transaction_id.unwrap_or_default();
        let mut events: Vec<AuditEvent> = self.queue.into_values().collect();
        if events.is_empty() {
            debug!("audit commit: nothing to persist (transaction={transaction_id})");
            return Ok(0);
        }

        debug!("audit commit:start transaction={transaction_id} events={}", events.len());
        collector.enrichers.apply(&mut events);
        if let Err(e) = collector.persister.log_events(&events) {
            error!("audit commit failed transaction={transaction_id} events={}: {e}", events.len());
            return Err(e);
        }
        debug!("audit commit:done transaction={transaction_id}");
        Ok(events.len())
    }

    /// Descarta la cola sin tocar el persister.
    pub fn abort(self) {
        if !self.queue.is_empty() {
            debug!("audit abort: discarding {} queued events", self.queue.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::meta::ApplicationMetadata;
    use crate::persister::{InMemoryPublisher, QueuePersister, QueuePersisterConfig};
    use crate::factory::EventFactory;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    /// Persister que guarda cada batch recibido.
    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<AuditEvent>>>,
    }

    impl Persister for Recorder {
        fn log_events(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
            self.batches.lock().unwrap().push(events.to_vec());
            Ok(())
        }
    }

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    fn article_save(token: u64, is_new: bool) -> RecordChangeNotification {
        RecordChangeNotification::new(EntityToken(token), "articles", token as i64, is_new).with_schema_columns(["id", "title", "body", "created"])
    }

    #[test]
    fn cascaded_saves_share_one_transaction_and_one_call() {
        let recorder = Recorder::default();
        let collector = AuditCollector::new(&recorder);
        let mut tx = collector.begin();
        assert!(tx.transaction_id().is_none());

        tx.record_save(article_save(1, true).with_dirty(fields(json!({"title": "A", "created": "now"}))))
          .unwrap();
        tx.record_save(RecordChangeNotification::new(EntityToken(2), "tags", 10, true).with_schema_columns(["id", "name"])
                                                                         .with_dirty(fields(json!({"name": "rust"})))
                                                                         .with_parent_source("articles"))
          .unwrap();
        let id = tx.transaction_id().unwrap().to_string();
        assert_eq!(tx.commit().unwrap(), 2);

        let batches = recorder.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert!(batch.iter().all(|e| e.transaction_id() == id));
        assert_eq!(batch[0].source(), "articles");
        assert_eq!(batch[0].changed(), Some(&fields(json!({"title": "A"}))));
        assert_eq!(batch[1].parent_source(), Some("articles"));
    }

    #[test]
    fn resaving_an_entity_replaces_its_event_in_place() {
        let recorder = Recorder::default();
        let collector = AuditCollector::new(&recorder);
        let mut tx = collector.begin();
        tx.record_save(article_save(1, false).with_dirty(fields(json!({"title": "v1"})))).unwrap();
        tx.record_save(article_save(2, false).with_dirty(fields(json!({"title": "other"})))).unwrap();
        tx.record_save(article_save(1, false).with_dirty(fields(json!({"title": "v2"})))).unwrap();

        let titles: Vec<_> = tx.events().map(|e| e.changed().unwrap()["title"].clone()).collect();
        assert_eq!(titles, vec![json!("v2"), json!("other")]);
        assert_eq!(tx.len(), 2);
    }

    #[test]
    fn update_with_no_effective_change_is_suppressed() {
        let collector = AuditCollector::new(Recorder::default());
        let mut tx = collector.begin();
        let same = article_save(1, false).with_dirty(fields(json!({"title": "x", "modified": "t"})))
                                         .with_original(fields(json!({"title": "x"})));
        assert!(!tx.record_save(same).unwrap());
        assert!(tx.is_empty());
        assert_eq!(tx.commit().unwrap(), 0);
        assert!(collector.persister().batches.lock().unwrap().is_empty());
    }

    #[test]
    fn create_keeps_fields_equal_to_their_defaults() {
        let collector = AuditCollector::new(Recorder::default());
        let mut tx = collector.begin();
        let fresh = article_save(1, true).with_dirty(fields(json!({"title": "x"})))
                                         .with_original(fields(json!({"title": "x"})));
        assert!(tx.record_save(fresh).unwrap());
        let ev = tx.events().next().unwrap();
        assert_eq!(ev.kind(), EventKind::Create);
        assert_eq!(ev.original(), ev.changed());
    }

    #[test]
    fn original_falls_back_to_the_new_value() {
        let collector = AuditCollector::new(Recorder::default());
        let mut tx = collector.begin();
        tx.record_save(article_save(1, false).with_dirty(fields(json!({"title": "new", "body": "b"})))
                                             .with_original(fields(json!({"title": "old"}))))
          .unwrap();
        let ev = tx.events().next().unwrap();
        assert_eq!(ev.original(), Some(&fields(json!({"title": "old", "body": "b"}))));
    }

    #[test]
    fn association_properties_are_not_recorded() {
        let collector = AuditCollector::new(Recorder::default());
        let mut tx = collector.begin();
        let change = article_save(1, false).with_association_properties(["author"])
                                           .with_dirty(fields(json!({"author": {"id": 2}})));
        assert!(!tx.record_save(change).unwrap());

        let change = article_save(1, false).with_association_properties(["author"])
                                           .with_dirty(fields(json!({"author": {"id": 2}, "title": "t"})));
        assert!(tx.record_save(change).unwrap());
        assert!(!tx.events().next().unwrap().changed().unwrap().contains_key("author"));
    }

    #[test]
    fn save_without_schema_columns_records_nothing() {
        let collector = AuditCollector::new(Recorder::default());
        let mut tx = collector.begin();
        let bare = RecordChangeNotification::new(EntityToken(1), "articles", 1, true).with_dirty(fields(json!({"title": "t"})));
        assert!(!tx.record_save(bare).unwrap());
        assert!(tx.is_empty());

        let tracking = TrackingConfig { allow_list: vec!["title".into()],
                                        ..TrackingConfig::default() };
        let collector = AuditCollector::new(Recorder::default()).with_tracking(tracking);
        let mut tx = collector.begin();
        let bare = RecordChangeNotification::new(EntityToken(1), "articles", 1, true).with_dirty(fields(json!({"title": "t"})));
        assert!(tx.record_save(bare).unwrap());
    }

    #[test]
    fn allow_list_restricts_tracked_fields() {
        let tracking = TrackingConfig { allow_list: vec!["title".into()],
                                        ..TrackingConfig::default() };
        let collector = AuditCollector::new(Recorder::default()).with_tracking(tracking);
        let mut tx = collector.begin();
        tx.record_save(article_save(1, true).with_dirty(fields(json!({"title": "t", "body": "b"})))).unwrap();
        assert_eq!(tx.events().next().unwrap().changed(), Some(&fields(json!({"title": "t"}))));
    }

    #[test]
    fn delete_snapshot_drops_denied_fields() {
        let collector = AuditCollector::new(Recorder::default());
        let mut tx = collector.begin();
        tx.record_delete(RecordDeleteNotification::new(EntityToken(3), "comments", 3).with_snapshot(fields(json!({"body": "b", "created": "t"})))
                                                                         .with_parent_source("articles"))
          .unwrap();
        let ev = tx.events().next().unwrap();
        assert_eq!(ev.kind(), EventKind::Delete);
        assert_eq!(ev.original(), Some(&fields(json!({"body": "b"}))));
        assert_eq!(ev.parent_source(), Some("articles"));
    }

    #[test]
    fn abort_never_reaches_the_persister() {
        let collector = AuditCollector::new(Recorder::default());
        let mut tx = collector.begin();
        tx.record_delete(RecordDeleteNotification::new(EntityToken(1), "articles", 1)).unwrap();
        tx.abort();

        let mut dropped = collector.begin();
        dropped.record_delete(RecordDeleteNotification::new(EntityToken(1), "articles", 1)).unwrap();
        drop(dropped);
        assert!(collector.persister().batches.lock().unwrap().is_empty());
    }

    #[test]
    fn separate_operations_get_distinct_transaction_ids() {
        let collector = AuditCollector::new(Recorder::default());
        let mut a = collector.begin();
        let mut b = collector.begin();
        a.record_delete(RecordDeleteNotification::new(EntityToken(1), "articles", 1)).unwrap();
        b.record_delete(RecordDeleteNotification::new(EntityToken(1), "articles", 1)).unwrap();
        assert_ne!(a.transaction_id(), b.transaction_id());
    }

    #[test]
    fn commit_enriches_then_publishes() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let persister = QueuePersister::new(publisher.clone(), QueuePersisterConfig::default()).unwrap();
        let chain = EnricherChain::with_enrichers(vec![Box::new(ApplicationMetadata::new("blog"))]);
        let collector = AuditCollector::new(persister).with_enrichers(chain);

        let mut tx = collector.begin();
        tx.record_save(article_save(5, true).with_dirty(fields(json!({"title": "t"})))).unwrap();
        tx.commit().unwrap();

        let messages = publisher.messages();
        let events = EventFactory::new().decode_batch(&messages[0].body).unwrap();
        assert_eq!(events[0].meta()["app_name"], json!("blog"));
    }

    #[test]
    fn persister_failure_is_returned_from_commit() {
        let persister = QueuePersister::new(InMemoryPublisher::unreachable(), QueuePersisterConfig::default()).unwrap();
        let collector = AuditCollector::new(persister);
        let mut tx = collector.begin();
        tx.record_delete(RecordDeleteNotification::new(EntityToken(1), "articles", 1)).unwrap();
        assert!(matches!(tx.commit(), Err(AuditError::Connection(_))));
    }
}
