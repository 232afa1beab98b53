//! Carga de configuración de conexión desde variables de entorno.
//! Usa convención `DATABASE_URL` y parámetros opcionales de pool.

use std::env;

use audit_core::AuditError;
use dotenvy::dotenv;
use once_cell::sync::Lazy;

pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, AuditError> {
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectada.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuditError>
        where F: Fn(&str) -> Option<String>
    {
        let url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty())
                                        .ok_or_else(|| AuditError::Configuration("DATABASE_URL no definido".into()))?;
        let min_connections = parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS)?;
        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        Ok(Self { url,
                  min_connections,
                  max_connections })
    }
}

fn parse_or<F>(lookup: &F, key: &str, default: u32) -> Result<u32, AuditError>
    where F: Fn(&str) -> Option<String>
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim()
                        .parse()
                        .map_err(|_| AuditError::Configuration(format!("{key} must be a positive integer, got '{raw}'"))),
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
