//! Process configuration: loaded from a YAML file, overridable per-field by
//! `SUPERNODE_<FIELD>` environment variables, reloadable on `SIGHUP`.
//!
//! Grounded on `sem_os_server::main`'s env-var config reads, generalized
//! from ad hoc `std::env::var` calls at the call site into one struct so
//! the whole configuration can also come from a file and be hot-reloaded.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

fn default_http_address() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_coap_address() -> String {
    "0.0.0.0:8081".to_string()
}
fn default_workers_count() -> usize {
    4
}
fn default_worker_queue_len() -> usize {
    256
}
fn default_workers_expelling_interval_ms() -> u64 {
    60_000
}
fn default_timer_poll_interval_ms() -> u64 {
    50
}
fn default_http_connection_timeout_ms() -> u64 {
    30_000
}
fn default_upstream_request_timeout_ms() -> u64 {
    15_000
}
fn default_lru_timeout_ms() -> u64 {
    300_000
}
fn default_cryptonode_rpc_address() -> String {
    "http://127.0.0.1:18081".to_string()
}
fn default_stake_wallet_refresh_interval_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamDestinationSpec {
    pub uri: String,
    #[serde(default = "default_upstream_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

fn default_upstream_max_connections() -> usize {
    16
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpFilterConfig {
    pub requests_per_sec: f64,
    pub window_size_sec: f64,
    pub ban_ip_sec: u64,
    /// Path to a blacklist rule file (`allow|deny (all|CIDR)` lines per
    /// line). Missing or unset means default-allow with no rules loaded.
    #[serde(default)]
    pub blacklist_rules_path: Option<String>,
    #[serde(default = "default_true")]
    pub blacklist_default_allow: bool,
}

impl Default for IpFilterConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: 20.0,
            window_size_sec: 1.0,
            ban_ip_sec: 60,
            blacklist_rules_path: None,
            blacklist_default_allow: true,
        }
    }
}

/// Full process configuration. All fields have defaults so a
/// minimal or even empty YAML document still produces a runnable config;
/// `apply_env_overrides` then lets any field be pinned by environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_address")]
    pub http_address: String,
    #[serde(default = "default_coap_address")]
    pub coap_address: String,
    #[serde(default = "default_workers_count")]
    pub workers_count: usize,
    #[serde(default = "default_worker_queue_len")]
    pub worker_queue_len: usize,
    #[serde(default = "default_workers_expelling_interval_ms")]
    pub workers_expelling_interval_ms: u64,
    #[serde(default = "default_timer_poll_interval_ms")]
    pub timer_poll_interval_ms: u64,
    #[serde(default = "default_http_connection_timeout_ms")]
    pub http_connection_timeout_ms: u64,
    #[serde(default = "default_upstream_request_timeout_ms")]
    pub upstream_request_timeout_ms: u64,
    #[serde(default = "default_lru_timeout_ms")]
    pub lru_timeout_ms: u64,
    #[serde(default = "default_cryptonode_rpc_address")]
    pub cryptonode_rpc_address: String,
    #[serde(default)]
    pub upstream: HashMap<String, UpstreamDestinationSpec>,
    #[serde(default)]
    pub ipfilter: IpFilterConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub stake_wallet_name: String,
    #[serde(default = "default_stake_wallet_refresh_interval_ms")]
    pub stake_wallet_refresh_interval_ms: u64,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub watchonly_wallets_path: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_address: default_http_address(),
            coap_address: default_coap_address(),
            workers_count: default_workers_count(),
            worker_queue_len: default_worker_queue_len(),
            workers_expelling_interval_ms: default_workers_expelling_interval_ms(),
            timer_poll_interval_ms: default_timer_poll_interval_ms(),
            http_connection_timeout_ms: default_http_connection_timeout_ms(),
            upstream_request_timeout_ms: default_upstream_request_timeout_ms(),
            lru_timeout_ms: default_lru_timeout_ms(),
            cryptonode_rpc_address: default_cryptonode_rpc_address(),
            upstream: HashMap::new(),
            ipfilter: IpFilterConfig::default(),
            data_dir: default_data_dir(),
            stake_wallet_name: String::new(),
            stake_wallet_refresh_interval_ms: default_stake_wallet_refresh_interval_ms(),
            testnet: false,
            watchonly_wallets_path: String::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
        let mut config: Config =
            serde_yaml::from_str(&text).map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// `SUPERNODE_<FIELD>` overrides a handful of operationally-relevant
    /// scalar fields without touching the YAML file — these are commonly
    /// flipped per-deployment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SUPERNODE_HTTP_ADDRESS") {
            self.http_address = v;
        }
        if let Ok(v) = std::env::var("SUPERNODE_WORKERS_COUNT") {
            if let Ok(n) = v.parse() {
                self.workers_count = n;
            }
        }
        if let Ok(v) = std::env::var("SUPERNODE_CRYPTONODE_RPC_ADDRESS") {
            self.cryptonode_rpc_address = v;
        }
        if let Ok(v) = std::env::var("SUPERNODE_DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = std::env::var("SUPERNODE_TESTNET") {
            self.testnet = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn http_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.http_connection_timeout_ms)
    }

    pub fn upstream_request_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_request_timeout_ms)
    }

    pub fn lru_timeout(&self) -> Duration {
        Duration::from_millis(self.lru_timeout_ms)
    }

    pub fn timer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.timer_poll_interval_ms)
    }

    pub fn workers_expelling_interval(&self) -> Duration {
        Duration::from_millis(self.workers_expelling_interval_ms)
    }
}
