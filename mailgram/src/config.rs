//! Process configuration, loaded from a single TOML file (spec.md §6).
//! There is no file-based static user list here — this server only runs
//! in the provider shape, so every field below is about wiring, not
//! accounts (SPEC_FULL.md §4.15).

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Connection string for the relational store (spec.md §6).
    pub relational_store_dsn: String,

    pub object_store: ObjectStoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Local spool directory for not-yet-uploaded message bodies.
    pub spool_directory: PathBuf,

    /// Identifies this process among cooperating instances; stamped onto
    /// pending-upload leases (spec.md §4.5, §9).
    pub instance_id: String,

    #[serde(default)]
    pub upload_worker: UploadWorkerConfig,

    #[serde(default)]
    pub gc: GcConfig,

    #[serde(default)]
    pub vacation: VacationConfig,

    #[serde(default)]
    pub pop3: Pop3Config,

    /// One entry per protocol front-end this deployment intends to run.
    /// The front-ends themselves (wire framing) are out of scope here;
    /// this is only the construction point for their TLS acceptors
    /// (spec.md §6: "TLS certificate/key paths per listener").
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub protocol: String,
    pub bind_addr: String,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "garage".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_size_limit")]
    pub size_limit_bytes: u64,
}

fn default_cache_size_limit() -> u64 {
    256 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { size_limit_bytes: default_cache_size_limit() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadWorkerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_attempts() -> i32 {
    8
}
fn default_retry_interval_secs() -> i64 {
    60
}
fn default_batch_size() -> i64 {
    50
}
fn default_poll_interval_secs() -> u64 {
    15
}

impl Default for UploadWorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_secs: default_retry_interval_secs(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_gc_grace_period_secs")]
    pub grace_period_secs: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_gc_interval_secs")]
    pub interval_secs: u64,
}

fn default_gc_grace_period_secs() -> i64 {
    7 * 24 * 3600
}
fn default_gc_interval_secs() -> u64 {
    3600
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_gc_grace_period_secs(),
            batch_size: default_batch_size(),
            interval_secs: default_gc_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VacationConfig {
    #[serde(default = "default_vacation_ledger_ttl_secs")]
    pub ledger_ttl_secs: i64,
    #[serde(default = "default_vacation_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_vacation_ledger_ttl_secs() -> i64 {
    30 * 24 * 3600
}
fn default_vacation_cleanup_interval_secs() -> u64 {
    6 * 3600
}

impl Default for VacationConfig {
    fn default() -> Self {
        Self {
            ledger_ttl_secs: default_vacation_ledger_ttl_secs(),
            cleanup_interval_secs: default_vacation_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pop3Config {
    #[serde(default = "default_pop3_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_pop3_max_errors")]
    pub max_errors: u32,
}

fn default_pop3_idle_timeout_secs() -> u64 {
    5 * 60
}
fn default_pop3_max_errors() -> u32 {
    3
}

impl Default for Pop3Config {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_pop3_idle_timeout_secs(),
            max_errors: default_pop3_max_errors(),
        }
    }
}

pub fn read_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config file {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing config file {}: {}", path.display(), e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let toml = r#"
            relational_store_dsn = "postgres://localhost/mailgram"
            spool_directory = "/var/lib/mailgram/spool"
            instance_id = "node-a"

            [object_store]
            endpoint = "https://s3.example.com"
            bucket = "mail"
            access_key_id = "AKIA"
            secret_access_key = "secret"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.upload_worker.max_attempts, 8);
        assert_eq!(config.gc.grace_period_secs, 7 * 24 * 3600);
        assert_eq!(config.cache.size_limit_bytes, 256 * 1024 * 1024);
        assert_eq!(config.pop3.max_errors, 3);
    }
}
