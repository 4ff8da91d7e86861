//! HTTP client for a ledger gateway relay.
//!
//! The relay holds the signing key and submits contract transactions on the
//! wallet's behalf. Each write carries an `Idempotency-Key` derived from the
//! request path, its body and a per-call nonce. Attempts that run inside one
//! [`with_call_nonce`] scope share the nonce, so a retried call never submits
//! twice while two distinct calls with equal arguments never collide.

use std::future::Future;

use agora_core::{
    Address, AgoraError, JobId, JobPhase, JobRequest, LedgerGateway, MemoId, MemoType,
    PayableDetails, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

tokio::task_local! {
    static CALL_NONCE: String;
}

/// Run `call` with one idempotency nonce shared by every write inside it.
pub async fn with_call_nonce<F: Future>(nonce: impl Into<String>, call: F) -> F::Output {
    CALL_NONCE.scope(nonce.into(), call).await
}

/// Nonce of the enclosing [`with_call_nonce`] scope.
pub fn current_call_nonce() -> Option<String> {
    CALL_NONCE.try_with(|nonce| nonce.clone()).ok()
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: u64,
}

/// Client for a ledger gateway relay.
#[derive(Clone)]
pub struct LedgerClient {
    base_url: String,
    wallet: Address,
    contract: Address,
    http_client: reqwest::Client,
}

impl LedgerClient {
    pub fn new(url: &str, wallet: impl Into<Address>, contract: impl Into<Address>) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            wallet: wallet.into(),
            contract: contract.into(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn wallet(&self) -> &Address {
        &self.wallet
    }

    async fn post<T: DeserializeOwned>(&self, operation: &str, path: &str, body: Value) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        // outside any scope every call is its own logical write
        let nonce = current_call_nonce().unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = idempotency_key(&self.wallet, operation, path, &nonce, &body);

        let response = self
            .http_client
            .post(&url)
            .header("Idempotency-Key", &key)
            .header("wallet-address", self.wallet.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| AgoraError::ledger(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("{status}: {error_text}");
            return Err(match status.as_u16() {
                401 | 403 => AgoraError::ledger_fatal(operation, message),
                400 | 422 => AgoraError::ledger_fatal(operation, message),
                _ => AgoraError::ledger(operation, message),
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| AgoraError::SerializationError(e.to_string()))?;
        tracing::debug!(operation, key = %key, "ledger call accepted");
        Ok(envelope.data)
    }
}

/// SHA-256 over the wallet, operation, path, nonce and canonical body,
/// hex-encoded.
pub fn idempotency_key(wallet: &Address, operation: &str, path: &str, nonce: &str, body: &Value) -> String {
    let mut hasher = Sha256::new();
    for part in [wallet.as_str(), operation, path, nonce] {
        hasher.update(part.as_bytes());
        hasher.update(b":");
    }
    hasher.update(body.to_string().as_bytes());
    hex_encode(hasher.finalize())
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
}

#[async_trait]
impl LedgerGateway for LedgerClient {
    async fn create_job(&self, request: &JobRequest) -> Result<JobId> {
        let body = json!({
            "contractAddress": self.contract,
            "providerAddress": request.provider,
            "evaluatorAddress": request.evaluator.clone().unwrap_or_else(Address::zero),
            "expiredAt": request.expires_at.timestamp(),
            "budget": request.fare_amount,
        });
        let created: Created = self.post("create_job", "/jobs", body).await?;
        Ok(created.id)
    }

    async fn sign_memo(&self, memo_id: MemoId, approve: bool, reason: Option<&str>) -> Result<()> {
        let body = json!({
            "isApproved": approve,
            "reason": reason.unwrap_or_default(),
        });
        let _: Value = self
            .post("sign_memo", &format!("/memos/{memo_id}/sign"), body)
            .await?;
        Ok(())
    }

    async fn create_memo(
        &self,
        job_id: JobId,
        content: &str,
        memo_type: MemoType,
        is_secured: bool,
        next_phase: JobPhase,
    ) -> Result<MemoId> {
        let body = json!({
            "content": content,
            "memoType": memo_type,
            "isSecured": is_secured,
            "nextPhase": next_phase,
        });
        let created: Created = self
            .post("create_memo", &format!("/jobs/{job_id}/memos"), body)
            .await?;
        Ok(created.id)
    }

    async fn create_payable_memo(
        &self,
        job_id: JobId,
        content: &str,
        payable: &PayableDetails,
        memo_type: MemoType,
        next_phase: JobPhase,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<MemoId> {
        let body = json!({
            "content": content,
            "memoType": memo_type,
            "nextPhase": next_phase,
            "payableDetails": payable,
            "expiredAt": expires_at.map(|t| t.timestamp()),
        });
        let created: Created = self
            .post("create_payable_memo", &format!("/jobs/{job_id}/payable-memos"), body)
            .await?;
        Ok(created.id)
    }

    async fn approve_allowance(&self, token: &Address, amount: u128) -> Result<()> {
        let body = json!({
            "tokenAddress": token,
            "spender": self.contract,
            "amount": amount.to_string(),
        });
        let _: Value = self.post("approve_allowance", "/allowances", body).await?;
        Ok(())
    }

    async fn read_contract(&self, contract: &Address, method: &str, args: &[Value]) -> Result<Value> {
        let body = json!({ "method": method, "args": args });
        self.post("read_contract", &format!("/contracts/{contract}/read"), body)
            .await
    }
}
