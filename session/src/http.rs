//! EIP-1193 style wallet provider over HTTP JSON-RPC.
//!
//! Wallet bridges that expose the injected-provider API over HTTP cannot
//! push events, so change notifications are produced by a watcher task that
//! polls `eth_accounts` and `eth_chainId` while at least one listener is
//! registered.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use tally_types::{Address, ChainId};

use crate::error::SessionError;
use crate::listeners::{ListenerRegistry, Subscription};
use crate::provider::{EventKind, WalletEvent, WalletProvider};

/// JSON-RPC 2.0 transport shared between the provider and its watcher.
#[derive(Clone)]
struct Transport {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl Transport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Provider(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SessionError::Provider(format!(
                "wallet returned HTTP {}",
                response.status()
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| SessionError::Provider(format!("invalid JSON response: {e}")))?;

        if let Some(err) = json.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(SessionError::from_code(code, message));
        }

        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn accounts(&self, method: &str) -> Result<Vec<Address>, SessionError> {
        let raw: Vec<String> = serde_json::from_value(self.request(method, json!([])).await?)
            .map_err(|e| SessionError::Provider(format!("invalid accounts response: {e}")))?;
        raw.iter()
            .map(|a| Address::parse(a).map_err(|e| SessionError::Provider(e.to_string())))
            .collect()
    }

    async fn chain_id(&self) -> Result<ChainId, SessionError> {
        let raw = self.request("eth_chainId", json!([])).await?;
        let raw = raw
            .as_str()
            .ok_or_else(|| SessionError::Provider("eth_chainId did not return a string".into()))?;
        ChainId::parse(raw).map_err(|e| SessionError::Provider(e.to_string()))
    }
}

/// Wallet provider reached over HTTP.
pub struct HttpWalletProvider {
    transport: Transport,
    registry: ListenerRegistry,
    watch_interval: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl HttpWalletProvider {
    pub fn new(url: impl Into<String>, watch_interval: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::Provider(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            transport: Transport {
                http,
                url: url.into(),
                next_id: Arc::new(AtomicU64::new(1)),
            },
            registry: ListenerRegistry::new(),
            watch_interval,
            watcher: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.transport.url
    }

    /// Start the watcher unless one is already running.
    fn ensure_watcher(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                *watcher = Some(handle.spawn(watch(
                    self.transport.clone(),
                    self.registry.clone(),
                    self.watch_interval,
                )));
            }
            Err(_) => tracing::warn!("no async runtime, wallet change events disabled"),
        }
    }
}

impl Drop for HttpWalletProvider {
    fn drop(&mut self) {
        if let Some(handle) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, SessionError> {
        self.transport.accounts("eth_requestAccounts").await
    }

    async fn chain_id(&self) -> Result<ChainId, SessionError> {
        self.transport.chain_id().await
    }

    async fn switch_chain(&self, chain: ChainId) -> Result<(), SessionError> {
        self.transport
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": chain.to_hex() }]),
            )
            .await
            .map(|_| ())
    }

    fn subscribe(&self, kind: EventKind) -> Subscription {
        let subscription = self.registry.subscribe(kind);
        self.ensure_watcher();
        subscription
    }
}

/// Poll the wallet and emit changes until no listeners remain.
async fn watch(transport: Transport, registry: ListenerRegistry, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_accounts: Option<Vec<Address>> = None;
    let mut last_chain: Option<ChainId> = None;

    loop {
        ticker.tick().await;
        if registry.total_listeners() == 0 {
            tracing::debug!("no wallet listeners left, watcher stopping");
            break;
        }

        match transport.accounts("eth_accounts").await {
            Ok(accounts) => {
                if last_accounts.as_ref().is_some_and(|prev| *prev != accounts) {
                    registry.emit(WalletEvent::AccountsChanged(accounts.clone()));
                }
                last_accounts = Some(accounts);
            }
            Err(e) => tracing::debug!(error = %e, "eth_accounts poll failed"),
        }

        match transport.chain_id().await {
            Ok(chain) => {
                if last_chain.is_some_and(|prev| prev != chain) {
                    registry.emit(WalletEvent::ChainChanged(chain));
                }
                last_chain = Some(chain);
            }
            Err(e) => tracing::debug!(error = %e, "eth_chainId poll failed"),
        }
    }
}
