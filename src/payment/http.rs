//! JSON-over-HTTP ledger client for a wallet service.
//!
//! ## Endpoints
//!
//! - `GET  {base}/balances/{address}` -> `{"balance": "<decimal>"}`
//! - `GET  {base}/allowances/{owner}/{spender}` -> `{"allowance": "<decimal>"}`
//! - `POST {base}/transfers` `{"from", "to", "amount"}` -> `{"transactionRef": "0x.."}`,
//!   answered after the transfer is confirmed
//!
//! Amounts are decimal strings so they survive JSON number precision.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{LedgerClient, LedgerError};

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct AllowanceResponse {
    allowance: String,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    from: &'a str,
    to: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    transaction_ref: String,
}

/// [`LedgerClient`] talking to a wallet service.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, LedgerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::Contract(format!("Malformed ledger response: {}", e)))
    }
}

fn classify_request_error(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::Timeout
    } else if e.is_connect() || e.is_request() {
        LedgerError::Network(e.to_string())
    } else {
        LedgerError::Contract(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: String) -> LedgerError {
    match status {
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => LedgerError::Reverted(body),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            LedgerError::Network(format!("{}: {}", status, body))
        }
        // The upstream may have applied the call before giving up.
        StatusCode::GATEWAY_TIMEOUT => LedgerError::Timeout,
        _ => LedgerError::Contract(format!("{}: {}", status, body)),
    }
}

fn parse_amount(raw: &str) -> Result<u128, LedgerError> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::Contract(format!("Invalid amount: {}", raw)))
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn balance_of(&self, address: &str) -> Result<u128, LedgerError> {
        let response = self
            .client
            .get(self.url(&format!("/balances/{}", address)))
            .send()
            .await
            .map_err(classify_request_error)?;
        let body: BalanceResponse = Self::read_json(response).await?;
        parse_amount(&body.balance)
    }

    async fn allowance(&self, owner: &str, spender: &str) -> Result<u128, LedgerError> {
        let response = self
            .client
            .get(self.url(&format!("/allowances/{}/{}", owner, spender)))
            .send()
            .await
            .map_err(classify_request_error)?;
        let body: AllowanceResponse = Self::read_json(response).await?;
        parse_amount(&body.allowance)
    }

    async fn transfer(
        &self,
        from: &str,
        spender: &str,
        amount: u128,
    ) -> Result<String, LedgerError> {
        let response = self
            .client
            .post(self.url("/transfers"))
            .json(&TransferRequest {
                from,
                to: spender,
                amount: amount.to_string(),
            })
            .send()
            .await
            .map_err(classify_request_error)?;
        let body: TransferResponse = Self::read_json(response).await?;
        Ok(body.transaction_ref)
    }
}
