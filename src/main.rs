//! Mention gate HTTP server.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mention_gate::api::{self, AppState};
use mention_gate::cache::spawn_sweeper;
use mention_gate::clock::{ClockRef, SystemClock};
use mention_gate::collaborators::{
    AnalysisGeneratorRef, HttpTokenIssuer, TokenIssuerRef, TokenMetadataGeneratorRef,
    Unconfigured,
};
use mention_gate::llm::{
    LlmAnalysisGenerator, LlmClient, LlmTokenMetadataGenerator, OpenRouterClient,
};
use mention_gate::orchestrator::Collaborators;
use mention_gate::payment::{HttpLedgerClient, InMemoryLedger, LedgerClient};
use mention_gate::store::{MemoryStore, SqliteStore, StoreRef};
use mention_gate::{Config, GateContext, MentionOrchestrator};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mention_gate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let clock: ClockRef = Arc::new(SystemClock);

    let store: StoreRef = match &config.database_path {
        Some(path) => {
            info!("Using SQLite state at {}", path.display());
            Arc::new(SqliteStore::open(path, Arc::clone(&clock))?)
        }
        None => {
            info!("DATABASE_PATH not set, state is kept in memory");
            Arc::new(MemoryStore::new(Arc::clone(&clock)))
        }
    };

    let collaborators = wire_collaborators(&config)?;
    let ctx = Arc::new(GateContext::new(
        &config,
        store,
        Arc::clone(&clock),
        collaborators,
    ));

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        Arc::clone(&ctx.cache),
        Arc::clone(&ctx.confirmations),
        config.cache.sweep_interval,
        cancel.clone(),
    );

    let state = Arc::new(AppState {
        orchestrator: MentionOrchestrator::new(ctx),
    });

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            cancel.cancel();
        }
    };

    api::serve(config.bind, state, shutdown).await?;
    cancel.cancel();
    sweeper.await?;
    Ok(())
}

/// Pick real or stand-in collaborators from configuration.
fn wire_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let (analysis, metadata): (AnalysisGeneratorRef, TokenMetadataGeneratorRef) =
        match &config.openrouter_api_key {
            Some(key) => {
                let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(key.clone())?);
                info!(model = %config.analysis_model, "LLM collaborators enabled");
                let analysis: AnalysisGeneratorRef = Arc::new(LlmAnalysisGenerator::new(
                    Arc::clone(&llm),
                    &config.analysis_model,
                ));
                let metadata: TokenMetadataGeneratorRef =
                    Arc::new(LlmTokenMetadataGenerator::new(llm, &config.analysis_model));
                (analysis, metadata)
            }
            None => {
                tracing::warn!("OPENROUTER_API_KEY not set, analyses will fail");
                let missing = Unconfigured::new("OPENROUTER_API_KEY");
                let analysis: AnalysisGeneratorRef = Arc::new(missing.clone());
                let metadata: TokenMetadataGeneratorRef = Arc::new(missing);
                (analysis, metadata)
            }
        };

    let ledger: Arc<dyn LedgerClient> = match &config.ledger_url {
        Some(url) => {
            info!("Using ledger service at {}", url);
            Arc::new(HttpLedgerClient::new(url.clone(), HTTP_TIMEOUT)?)
        }
        None => {
            tracing::warn!("LEDGER_URL not set, using an empty in-memory ledger");
            Arc::new(InMemoryLedger::new())
        }
    };

    let issuer: TokenIssuerRef = match &config.token_issuer_url {
        Some(url) => {
            info!("Using token issuer at {}", url);
            Arc::new(HttpTokenIssuer::new(url.clone(), HTTP_TIMEOUT)?)
        }
        None => {
            tracing::warn!("TOKEN_ISSUER_URL not set, token issuance will fail");
            Arc::new(Unconfigured::new("TOKEN_ISSUER_URL"))
        }
    };

    Ok(Collaborators {
        analysis,
        metadata,
        issuer,
        ledger,
    })
}
