//! Coordinator configuration with TOML file support.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tally_ledger::LedgerMethod;
use tally_publish::PinataConfig;
use tally_types::{Address, ChainId};
use tally_utils::LogFormat;

use crate::error::ConfigError;

/// Environment variable that supplies the publication JWT.
pub const JWT_ENV: &str = "TALLY_PINATA_JWT";

/// Configuration for the election coordinator.
///
/// Can be loaded from a TOML file via [`ElectionConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Network the contract lives on. Wallets on any other network are refused.
    #[serde(default = "default_chain_id")]
    pub chain_id: ChainId,

    /// Address of the deployed election contract. Required.
    #[serde(default)]
    pub contract_address: Option<Address>,

    /// Path to the contract's JSON interface description. Required.
    #[serde(default)]
    pub contract_abi: Option<PathBuf>,

    /// Contract gateway endpoint.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Wallet provider endpoint. Absent means no wallet is available.
    #[serde(default)]
    pub wallet_url: Option<String>,

    /// How often to poll for a transaction receipt.
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// How often to refresh candidates and live counts while the election is active.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Publication service endpoints and credential.
    #[serde(default)]
    pub publication: PinataConfig,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_chain_id() -> ChainId {
    ChainId::SEPOLIA
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8545/gateway".to_string()
}

fn default_receipt_poll_interval_ms() -> u64 {
    1_000
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl ElectionConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Take the publication JWT from [`JWT_ENV`] when it is set.
    pub fn apply_env(&mut self) {
        self.apply_credential(std::env::var(JWT_ENV).ok());
    }

    /// Override the publication JWT. Blank values are ignored.
    pub fn apply_credential(&mut self, jwt: Option<String>) {
        if let Some(jwt) = jwt.filter(|j| !j.trim().is_empty()) {
            self.publication.jwt = Some(jwt);
        }
    }

    /// The contract address, or [`ConfigError::Missing`].
    pub fn contract(&self) -> Result<&Address, ConfigError> {
        self.contract_address
            .as_ref()
            .ok_or(ConfigError::Missing("contract_address"))
    }

    /// The contract interface path, or [`ConfigError::Missing`].
    pub fn contract_abi(&self) -> Result<&Path, ConfigError> {
        self.contract_abi
            .as_deref()
            .ok_or(ConfigError::Missing("contract_abi"))
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.contract()?;
        if self.gateway_url.trim().is_empty() {
            return Err(ConfigError::Missing("gateway_url"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.receipt_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "receipt_poll_interval_ms",
                reason: "must be at least 1".into(),
            });
        }
        check_contract_abi(self.contract_abi()?)
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            contract_address: None,
            contract_abi: None,
            gateway_url: default_gateway_url(),
            wallet_url: None,
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            publication: PinataConfig::default(),
        }
    }
}

/// Read a contract interface file and make sure it declares every function
/// the coordinator calls.
///
/// Accepts either a bare ABI array or a build artifact with an `abi` field.
pub fn check_contract_abi(path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let json: Value = serde_json::from_str(&content).map_err(|e| ConfigError::Abi(e.to_string()))?;
    let entries = match &json {
        Value::Array(entries) => entries,
        Value::Object(artifact) => artifact
            .get("abi")
            .and_then(Value::as_array)
            .ok_or_else(|| ConfigError::Abi("expected an array or an object with `abi`".into()))?,
        _ => return Err(ConfigError::Abi("expected an array or an object with `abi`".into())),
    };

    let declared: HashSet<&str> = entries
        .iter()
        .filter(|e| e.get("type").and_then(Value::as_str).unwrap_or("function") == "function")
        .filter_map(|e| e.get("name").and_then(Value::as_str))
        .collect();

    let missing: Vec<String> = LedgerMethod::ALL
        .iter()
        .map(LedgerMethod::as_str)
        .filter(|name| !declared.contains(name))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::AbiMissingFunctions(missing))
    }
}
