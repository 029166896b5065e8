//! HTTP client for a JSON contract gateway.
//!
//! Every request is a `POST` of a JSON object carrying the contract method
//! in `action` and the contract address in `contract`, plus the method's
//! arguments. The gateway answers `{ "result": ... }` on success or
//! `{ "error": "...", "code": N }` on failure.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use tally_types::{Address, CandidateName, TxHash, TxReceipt};

use crate::contract::{ElectionLedger, LedgerMethod, PendingTx};
use crate::error::LedgerError;

const RECEIPT_ACTION: &str = "getTransactionReceipt";

/// Typed client for the contract gateway.
#[derive(Clone)]
pub struct HttpLedger {
    http: reqwest::Client,
    gateway_url: String,
    contract: Address,
    receipt_poll_interval: Duration,
}

impl HttpLedger {
    /// Create a client for `contract` behind the gateway at `gateway_url`.
    pub fn new(
        gateway_url: impl Into<String>,
        contract: Address,
        receipt_poll_interval: Duration,
    ) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LedgerError::Rpc(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            gateway_url: gateway_url.into(),
            contract,
            receipt_poll_interval,
        })
    }

    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    /// Send one gateway request and return its `result` field.
    async fn call(&self, action: &str, params: Value) -> Result<Value, LedgerError> {
        let mut body = params;
        let object = body
            .as_object_mut()
            .ok_or_else(|| LedgerError::Rpc("params must be a JSON object".into()))?;
        object.insert("action".to_string(), json!(action));
        object.insert("contract".to_string(), json!(self.contract.as_str()));

        let response = self
            .http
            .post(&self.gateway_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LedgerError::Rpc(format!(
                "gateway returned HTTP {}",
                response.status()
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("invalid JSON response: {e}")))?;

        if let Some(err) = json.get("error") {
            let message = err
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            let code = json.get("code").and_then(Value::as_i64).unwrap_or(-1);
            return Err(LedgerError::from_code(code, message));
        }

        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        method: LedgerMethod,
        params: Value,
    ) -> Result<T, LedgerError> {
        let result = self.call(method.as_str(), params).await?;
        serde_json::from_value(result)
            .map_err(|e| LedgerError::Decode(format!("invalid {method} response: {e}")))
    }

    async fn submit(
        &self,
        method: LedgerMethod,
        from: &Address,
        params: Value,
    ) -> Result<PendingTx, LedgerError> {
        let mut params = params;
        if let Some(object) = params.as_object_mut() {
            object.insert("from".to_string(), json!(from.as_str()));
        }
        let hash: String = self.query(method, params).await?;
        tracing::debug!(%method, tx = %hash, "transaction submitted");
        Ok(PendingTx::new(TxHash::new(hash), method))
    }
}

/// Gateway vote counts may arrive as numbers or decimal strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

impl Count {
    fn value(self) -> Result<u64, LedgerError> {
        match self {
            Count::Number(n) => Ok(n),
            Count::Text(s) => s
                .parse()
                .map_err(|e| LedgerError::Decode(format!("invalid count {s:?}: {e}"))),
        }
    }
}

#[async_trait]
impl ElectionLedger for HttpLedger {
    async fn admin(&self) -> Result<Address, LedgerError> {
        let raw: String = self.query(LedgerMethod::Admin, json!({})).await?;
        Address::parse(&raw).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn voters(&self, account: &Address) -> Result<bool, LedgerError> {
        self.query(LedgerMethod::Voters, json!({ "account": account.as_str() }))
            .await
    }

    async fn has_voted(&self, account: &Address) -> Result<bool, LedgerError> {
        self.query(LedgerMethod::HasVoted, json!({ "account": account.as_str() }))
            .await
    }

    async fn get_candidates(&self) -> Result<Vec<CandidateName>, LedgerError> {
        let names: Vec<String> = self.query(LedgerMethod::GetCandidates, json!({})).await?;
        Ok(names.into_iter().map(CandidateName::from_ledger).collect())
    }

    async fn get_votes(&self, name: &CandidateName) -> Result<u64, LedgerError> {
        let count: Count = self
            .query(LedgerMethod::GetVotes, json!({ "name": name.as_str() }))
            .await?;
        count.value()
    }

    async fn get_final_results(&self, name: &CandidateName) -> Result<u64, LedgerError> {
        let count: Count = self
            .query(LedgerMethod::GetFinalResults, json!({ "name": name.as_str() }))
            .await?;
        count.value()
    }

    async fn election_active(&self) -> Result<bool, LedgerError> {
        self.query(LedgerMethod::ElectionActive, json!({})).await
    }

    async fn election_ended(&self) -> Result<bool, LedgerError> {
        self.query(LedgerMethod::ElectionEnded, json!({})).await
    }

    async fn election_results_ipfs_hash(&self) -> Result<String, LedgerError> {
        let hash: Option<String> = self
            .query(LedgerMethod::ElectionResultsIpfsHash, json!({}))
            .await?;
        Ok(hash.unwrap_or_default())
    }

    async fn register_candidate(
        &self,
        from: &Address,
        name: &CandidateName,
    ) -> Result<PendingTx, LedgerError> {
        self.submit(
            LedgerMethod::RegisterCandidate,
            from,
            json!({ "name": name.as_str() }),
        )
        .await
    }

    async fn register_voter(
        &self,
        from: &Address,
        voter: &Address,
    ) -> Result<PendingTx, LedgerError> {
        self.submit(
            LedgerMethod::RegisterVoter,
            from,
            json!({ "voter": voter.as_str() }),
        )
        .await
    }

    async fn vote(&self, from: &Address, name: &CandidateName) -> Result<PendingTx, LedgerError> {
        self.submit(LedgerMethod::Vote, from, json!({ "name": name.as_str() }))
            .await
    }

    async fn close_election(&self, from: &Address) -> Result<PendingTx, LedgerError> {
        self.submit(LedgerMethod::CloseElection, from, json!({}))
            .await
    }

    async fn store_election_results_ipfs(
        &self,
        from: &Address,
        hash: &str,
    ) -> Result<PendingTx, LedgerError> {
        self.submit(
            LedgerMethod::StoreElectionResultsIpfs,
            from,
            json!({ "hash": hash }),
        )
        .await
    }

    /// Poll the gateway until a receipt for `tx` appears.
    async fn wait_for_receipt(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError> {
        loop {
            let result = self
                .call(RECEIPT_ACTION, json!({ "hash": tx.hash.as_str() }))
                .await?;
            if !result.is_null() {
                let receipt: TxReceipt = serde_json::from_value(result)
                    .map_err(|e| LedgerError::Decode(format!("invalid receipt: {e}")))?;
                tracing::debug!(method = %tx.method, tx = %tx.hash, status = ?receipt.status, "receipt observed");
                return Ok(receipt);
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}
