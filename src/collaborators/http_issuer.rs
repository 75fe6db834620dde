//! Token issuer backed by a deployment service.
//!
//! `POST {base}/tokens` with `{name, symbol, description, creatorAddress}`;
//! the service answers with `{contractAddress, poolAddress, transactionRef}`
//! once the token is deployed and its pool funded.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{CollaboratorError, IssuedToken, TokenIssuer, TokenMetadata};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueRequest<'a> {
    name: &'a str,
    symbol: &'a str,
    description: &'a str,
    creator_address: &'a str,
}

pub struct HttpTokenIssuer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenIssuer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(
        &self,
        metadata: &TokenMetadata,
        creator_address: &str,
    ) -> Result<IssuedToken, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/tokens", self.base_url))
            .json(&IssueRequest {
                name: &metadata.name,
                symbol: &metadata.symbol,
                description: &metadata.description,
                creator_address,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Timeout(e.to_string())
                } else {
                    CollaboratorError::Issuance(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollaboratorError::RateLimited(
                "token issuer is throttling".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Issuance(format!("{}: {}", status, body)));
        }

        response
            .json::<IssuedToken>()
            .await
            .map_err(|e| CollaboratorError::Issuance(format!("Malformed issuer response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_issue_posts_metadata() {
        let router = Router::new().route(
            "/tokens",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["symbol"], "CAT");
                assert_eq!(body["creatorAddress"], "0xcreator");
                Json(json!({
                    "contractAddress": "0xtoken",
                    "poolAddress": "0xpool",
                    "transactionRef": "0xdeploy",
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let issuer =
            HttpTokenIssuer::new(format!("http://{}/", addr), Duration::from_secs(5)).unwrap();
        let metadata = TokenMetadata {
            name: "Cat Coin".into(),
            symbol: "CAT".into(),
            description: "meow".into(),
        };
        let issued = issuer.issue(&metadata, "0xcreator").await.unwrap();
        assert_eq!(issued.contract_address, "0xtoken");
        assert_eq!(issued.pool_address, "0xpool");
        assert_eq!(issued.transaction_ref, "0xdeploy");
    }
}
