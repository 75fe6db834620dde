//! HTTP layer over a live listener.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use mention_gate::api::{router, AppState};
use mention_gate::cache::AnalysisKind;
use mention_gate::clock::{ClockRef, SystemClock};
use mention_gate::collaborators::{
    AnalysisGenerator, CollaboratorError, SubjectData, Unconfigured,
};
use mention_gate::config::Config;
use mention_gate::orchestrator::{Collaborators, GateContext, MentionOrchestrator};
use mention_gate::payment::InMemoryLedger;
use mention_gate::store::SqliteStore;

struct EchoAnalysis;

#[async_trait]
impl AnalysisGenerator for EchoAnalysis {
    async fn generate(
        &self,
        kind: AnalysisKind,
        subject: &SubjectData,
        _target: Option<&SubjectData>,
    ) -> Result<Value, CollaboratorError> {
        Ok(json!({"kind": kind.as_str(), "user": subject.user_id}))
    }
}

async fn spawn_app() -> String {
    let config = Config::default();
    let clock: ClockRef = Arc::new(SystemClock);
    let store = Arc::new(SqliteStore::open_in_memory(Arc::clone(&clock)).unwrap());
    let unconfigured = Arc::new(Unconfigured::new("TOKEN_ISSUER_URL"));
    let ctx = GateContext::new(
        &config,
        store,
        clock,
        Collaborators {
            analysis: Arc::new(EchoAnalysis),
            metadata: unconfigured.clone(),
            issuer: unconfigured,
            ledger: Arc::new(InMemoryLedger::new()),
        },
    );
    let state = Arc::new(AppState {
        orchestrator: MentionOrchestrator::new(Arc::new(ctx)),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_mention_endpoint_round_trip() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    let body = json!({
        "sourceUserId": "Alice",
        "mentionText": "@agent what about me and @bob?",
        "correlationId": "c-1",
        "creatorAddress": "0xalice",
    });

    let first: Value = client
        .post(format!("{}/api/mention", base))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["type"], "QUESTION");
    assert_eq!(first["data"]["matchResult"]["kind"], "matching");
    assert_eq!(first["data"]["hits"], 1);
    assert_eq!(first["data"]["freeUsesLeft"], 4);

    let second: Value = client
        .post(format!("{}/api/mention", base))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["data"]["hits"], 2);
    assert_eq!(second["data"]["cached"], true);

    let quota: Value = client
        .get(format!("{}/api/quota/alice", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(quota["freeUsesLeft"], 4);
    assert_eq!(quota["history"].as_array().unwrap().len(), 1);

    let health: Value = client
        .get(format!("{}/api/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["cache"]["entries"], 1);
    assert_eq!(health["cache"]["hits"], 1);
}

#[tokio::test]
async fn test_failures_are_reported_in_body() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/mention", base))
        .json(&json!({
            "sourceUserId": "alice",
            "mentionText": "@agent create token",
            "correlationId": "c-2",
            "creatorAddress": "0xalice",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["type"], "TOKEN_CREATION");
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
    assert_eq!(body["data"]["freeUsesLeft"], 5);
}
