//! Gate context - the explicitly constructed components every mention visits.

use std::sync::Arc;

use crate::cache::ResultCache;
use crate::clock::ClockRef;
use crate::collaborators::{AnalysisGeneratorRef, TokenIssuerRef, TokenMetadataGeneratorRef};
use crate::config::Config;
use crate::confirmation::ConfirmationRegister;
use crate::payment::{LedgerClient, PaymentGate};
use crate::quota::QuotaLedger;
use crate::store::StoreRef;

/// External collaborators plugged into the gate.
#[derive(Clone)]
pub struct Collaborators {
    pub analysis: AnalysisGeneratorRef,
    pub metadata: TokenMetadataGeneratorRef,
    pub issuer: TokenIssuerRef,
    pub ledger: Arc<dyn LedgerClient>,
}

/// Shared state and collaborators for mention processing.
///
/// # Thread Safety
/// Everything is behind `Arc`; the stateful components serialize per key
/// internally, so one context serves all concurrent requests.
pub struct GateContext {
    /// Handle stripped from mention text
    pub agent_handle: String,

    pub cache: Arc<ResultCache>,
    pub quota: Arc<QuotaLedger>,
    pub payment: Arc<PaymentGate>,
    pub confirmations: Arc<ConfirmationRegister>,

    pub analysis: AnalysisGeneratorRef,
    pub metadata: TokenMetadataGeneratorRef,
    pub issuer: TokenIssuerRef,

    pub clock: ClockRef,
}

impl GateContext {
    /// Build every component over one store and clock.
    pub fn new(
        config: &Config,
        store: StoreRef,
        clock: ClockRef,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            agent_handle: config.agent_handle.clone(),
            cache: Arc::new(ResultCache::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                &config.cache,
            )),
            quota: Arc::new(QuotaLedger::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                &config.quota,
            )),
            payment: Arc::new(PaymentGate::new(collaborators.ledger, &config.payment)),
            confirmations: Arc::new(ConfirmationRegister::new(
                store,
                Arc::clone(&clock),
                config.confirmation_timeout,
            )),
            analysis: collaborators.analysis,
            metadata: collaborators.metadata,
            issuer: collaborators.issuer,
            clock,
        }
    }
}
