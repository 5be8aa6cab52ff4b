//! Layered configuration.
//!
//! Sources, later ones winning:
//! 1. defaults below
//! 2. `config/{environment}.toml` (optional)
//! 3. `STOCKLEDGER__SECTION__KEY` environment variables

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use stockledger_infra::LedgerSettings;
use stockledger_observability::LogFormat;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// development, production, test...
    pub environment: String,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub ledger: LedgerConfig,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL URL. Without one the process runs on the in-memory store.
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub lock_timeout_ms: u64,
    pub max_note_len: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STOCKLEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        config::Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("ledger.lock_timeout_ms", 5_000)?
            .set_default("ledger.max_note_len", 500)?
            .set_default("log.format", "json")?
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("STOCKLEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl LedgerConfig {
    pub fn to_ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            max_note_len: self.max_note_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_files_or_env() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings.ledger.max_note_len, 500);
        assert_eq!(
            settings.ledger.to_ledger_settings().lock_timeout,
            Duration::from_millis(settings.ledger.lock_timeout_ms)
        );
        assert!(settings.bind_address().ends_with(&settings.server.port.to_string()));
    }
}
