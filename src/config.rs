//! Configuración de la aplicación.
//! Carga variables de entorno (.env) y arma los persisters de forma
//! explícita: el colector nunca consulta esta configuración por su cuenta,
//! recibe el persister ya construido.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use audit_core::persist_task::DEFAULT_BATCH_SIZE;
use audit_core::persister::{BulkIndexClient, DeliveryMode, MessagePublisher, QueuePersister, QueuePersisterConfig,
                            RowStore, SearchIndexConfig, SearchIndexPersister, TablePersister, TablePersisterConfig};
use audit_core::{ApplicationMetadata, AuditError, EnricherChain, PersistTask, Persister};
use log::debug;

/// Estrategia de persistencia seleccionada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersisterKind {
    #[default]
    Table,
    Search,
    Queue,
}

impl PersisterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersisterKind::Table => "table",
            PersisterKind::Search => "search",
            PersisterKind::Queue => "queue",
        }
    }
}

impl fmt::Display for PersisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersisterKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(PersisterKind::Table),
            "search" => Ok(PersisterKind::Search),
            "queue" => Ok(PersisterKind::Queue),
            other => Err(AuditError::Configuration(format!("unknown persister '{other}' (expected table|search|queue)"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    pub persister: PersisterKind,
    pub table: TablePersisterConfig,
    pub search: SearchIndexConfig,
    pub queue: QueuePersisterConfig,
    /// Si está presente se registra un `ApplicationMetadata`.
    pub app_name: Option<String>,
    pub import_batch_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { persister: PersisterKind::default(),
               table: TablePersisterConfig::default(),
               search: SearchIndexConfig::new("", ""),
               queue: QueuePersisterConfig::default(),
               app_name: None,
               import_batch_size: DEFAULT_BATCH_SIZE }
    }
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, AuditError> {
        audit_persistence::init_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectada.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuditError>
        where F: Fn(&str) -> Option<String>
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = AuditConfig::default();

        if let Some(kind) = get("AUDIT_PERSISTER") {
            cfg.persister = kind.parse()?;
        }

        if let Some(table) = get("AUDIT_TABLE") {
            cfg.table.table = table;
        }
        if let Some(strategy) = get("AUDIT_PRIMARY_KEY_STRATEGY") {
            cfg.table.primary_key_strategy = strategy.parse()?;
        }
        if let Some(raw) = get("AUDIT_SERIALIZE_FIELDS") {
            cfg.table.serialize_fields = parse_bool("AUDIT_SERIALIZE_FIELDS", &raw)?;
        }
        if let Some(raw) = get("AUDIT_LOG_ERRORS") {
            cfg.table.log_errors = parse_bool("AUDIT_LOG_ERRORS", &raw)?;
        }
        if let Some(raw) = get("AUDIT_EXTRACT_META_FIELDS") {
            cfg.table.extract_meta_fields = raw.parse()?;
        }
        if let Some(raw) = get("AUDIT_UNSET_EXTRACTED_META_FIELDS") {
            cfg.table.unset_extracted_meta_fields = parse_bool("AUDIT_UNSET_EXTRACTED_META_FIELDS", &raw)?;
        }

        cfg.search.index = get("AUDIT_INDEX").unwrap_or_default();
        cfg.search.doc_type = get("AUDIT_INDEX_TYPE").unwrap_or_default();
        if let Some(raw) = get("AUDIT_REUSE_TRANSACTION_ID") {
            cfg.search.reuse_transaction_id = parse_bool("AUDIT_REUSE_TRANSACTION_ID", &raw)?;
        }
        if cfg.persister == PersisterKind::Search {
            if cfg.search.index.is_empty() {
                return Err(AuditError::Configuration("AUDIT_INDEX is required for the search persister".into()));
            }
            if cfg.search.doc_type.is_empty() {
                return Err(AuditError::Configuration("AUDIT_INDEX_TYPE is required for the search persister".into()));
            }
        }

        if let Some(exchange) = get("AUDIT_EXCHANGE") {
            cfg.queue.exchange = exchange;
        }
        if let Some(routing_key) = get("AUDIT_ROUTING_KEY") {
            cfg.queue.routing_key = routing_key;
        }
        if let Some(raw) = get("AUDIT_DELIVERY_MODE") {
            let mode: u8 = raw.parse()
                              .map_err(|_| AuditError::Configuration(format!("AUDIT_DELIVERY_MODE must be 1 or 2, got '{raw}'")))?;
            cfg.queue.delivery_mode = DeliveryMode::from_u8(mode)?;
        }

        cfg.app_name = get("AUDIT_APP_NAME");
        if let Some(raw) = get("AUDIT_IMPORT_BATCH_SIZE") {
            cfg.import_batch_size = match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(AuditError::Configuration(format!("AUDIT_IMPORT_BATCH_SIZE must be a positive integer, got '{raw}'")))
                }
            };
        }
        Ok(cfg)
    }

    /// Enrichers derivados de la configuración.
    pub fn enrichers(&self) -> EnricherChain {
        let mut chain = EnricherChain::new();
        if let Some(app_name) = &self.app_name {
            chain.push(Box::new(ApplicationMetadata::new(app_name.as_str())));
        }
        chain
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, AuditError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AuditError::Configuration(format!("{key} must be a boolean, got '{raw}'"))),
    }
}

/// Conexiones a los sinks. Sólo se exige la del persister seleccionado.
#[derive(Default, Clone)]
pub struct Sinks {
    pub rows: Option<Arc<dyn RowStore>>,
    pub index: Option<Arc<dyn BulkIndexClient>>,
    pub publisher: Option<Arc<dyn MessagePublisher>>,
}

impl Sinks {
    pub fn with_rows(mut self, rows: Arc<dyn RowStore>) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn BulkIndexClient>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn MessagePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }
}

fn missing_sink(kind: PersisterKind) -> AuditError {
    AuditError::Configuration(format!("the '{kind}' persister was selected but no sink connection was provided"))
}

/// Construye el persister seleccionado en `config.persister`.
pub fn build_persister(config: &AuditConfig, sinks: &Sinks) -> Result<Box<dyn Persister>, AuditError> {
    debug!("build_persister kind={}", config.persister);
    match config.persister {
        PersisterKind::Table => {
            let rows = sinks.rows.clone().ok_or_else(|| missing_sink(PersisterKind::Table))?;
            Ok(Box::new(TablePersister::new(rows, config.table.clone())?))
        }
        PersisterKind::Search => {
            let index = sinks.index.clone().ok_or_else(|| missing_sink(PersisterKind::Search))?;
            Ok(Box::new(SearchIndexPersister::new(index, config.search.clone())?))
        }
        PersisterKind::Queue => {
            let publisher = sinks.publisher.clone().ok_or_else(|| missing_sink(PersisterKind::Queue))?;
            Ok(Box::new(QueuePersister::new(publisher, config.queue.clone())?))
        }
    }
}

/// Consumidor de la cola con el tamaño de batch configurado.
pub fn build_persist_task<P: Persister>(config: &AuditConfig, persister: P) -> PersistTask<P> {
    PersistTask::new(persister).with_batch_size(config.import_batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::persister::{InMemoryPublisher, InMemoryRowStore};
    use audit_core::{MetaExtraction, MetaPath, PrimaryKeyStrategy};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = AuditConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, AuditConfig::default());
        assert_eq!(cfg.table.table, "audit_logs");
        assert_eq!(cfg.queue.exchange, "audits.persist");
        assert_eq!(cfg.import_batch_size, 50);
        assert!(cfg.enrichers().is_empty());
    }

    #[test]
    fn table_options_are_read() {
        let cfg = AuditConfig::from_lookup(lookup(&[("AUDIT_TABLE", "logs"),
                                                    ("AUDIT_PRIMARY_KEY_STRATEGY", "properties"),
                                                    ("AUDIT_SERIALIZE_FIELDS", "false"),
                                                    ("AUDIT_EXTRACT_META_FIELDS", "user.id=user_id,ip"),
                                                    ("AUDIT_APP_NAME", "blog")]))
                  .unwrap();
        assert_eq!(cfg.table.table, "logs");
        assert_eq!(cfg.table.primary_key_strategy, PrimaryKeyStrategy::Properties);
        assert!(!cfg.table.serialize_fields);
        assert_eq!(cfg.table.extract_meta_fields,
                   MetaExtraction::Paths(vec![MetaPath::aliased("user.id", "user_id"), MetaPath::new("ip")]));
        assert_eq!(cfg.enrichers().len(), 1);
    }

    #[test]
    fn search_requires_index_and_type() {
        let res = AuditConfig::from_lookup(lookup(&[("AUDIT_PERSISTER", "search"), ("AUDIT_INDEX", "audit%s")]));
        assert!(matches!(res, Err(AuditError::Configuration(_))));
        let cfg = AuditConfig::from_lookup(lookup(&[("AUDIT_PERSISTER", "search"),
                                                    ("AUDIT_INDEX", "audit%s"),
                                                    ("AUDIT_INDEX_TYPE", "audits")]))
                  .unwrap();
        assert_eq!(cfg.persister, PersisterKind::Search);
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        for vars in [[("AUDIT_PERSISTER", "ftp")],
                     [("AUDIT_DELIVERY_MODE", "3")],
                     [("AUDIT_LOG_ERRORS", "maybe")],
                     [("AUDIT_IMPORT_BATCH_SIZE", "0")],
                     [("AUDIT_PRIMARY_KEY_STRATEGY", "hashed")]]
        {
            assert!(matches!(AuditConfig::from_lookup(lookup(&vars)), Err(AuditError::Configuration(_))),
                    "{vars:?}");
        }
    }

    #[test]
    fn builder_needs_the_selected_sink() {
        let cfg = AuditConfig::from_lookup(lookup(&[("AUDIT_PERSISTER", "queue")])).unwrap();
        assert!(matches!(build_persister(&cfg, &Sinks::default()), Err(AuditError::Configuration(_))));

        let sinks = Sinks::default().with_rows(Arc::new(InMemoryRowStore::new()))
                                    .with_publisher(Arc::new(InMemoryPublisher::new()));
        assert!(build_persister(&cfg, &sinks).is_ok());
    }
}
