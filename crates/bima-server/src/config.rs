//! Server configuration

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub session: SessionSettings,
    pub reconciler: ReconcilerSettings,
    pub defaults: DefaultSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct SessionSettings {
    /// Secret for cookie-layer hardening; sessions themselves are
    /// server-side rows
    pub secret: String,
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReconcilerSettings {
    /// Sweep cadence; the contract is at least once per 24h
    #[serde(default = "default_reconciler_interval_secs")]
    pub interval_secs: u64,
    /// Broker URL for external schedulers/delivery adapters; unused by the
    /// in-process loop
    pub broker_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DefaultSettings {
    #[serde(default = "default_expiry_reminder_days")]
    pub expiry_reminder_days: i64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    10
}

fn default_session_ttl_hours() -> i64 {
    12
}

fn default_reconciler_interval_secs() -> u64 {
    86_400
}

fn default_expiry_reminder_days() -> i64 {
    30
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("session.ttl_hours", 12)?
            .set_default("reconciler.interval_secs", 86_400)?
            .set_default("defaults.expiry_reminder_days", 30)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("BIMA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
