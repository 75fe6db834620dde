//! # Mention Gate
//!
//! Backend gate for a social agent that answers mentions with analyses and
//! token launches. Every costly operation passes through it:
//!
//! - a fingerprinted result cache, so nothing is computed twice within its TTL
//! - a per-user quota of free matching analyses
//! - a payment gate once the free quota is spent
//! - a time-bounded confirmation handshake before a token is issued
//!
//! ## Architecture
//!
//! ```text
//! POST /api/mention
//!        |
//!   MentionOrchestrator --- classifier
//!        |---- ResultCache ----\
//!        |---- QuotaLedger -----+-- KvStore (memory | sqlite)
//!        |---- ConfirmationRegister
//!        |---- PaymentGate ---- LedgerClient
//!        \---- AnalysisGenerator / TokenMetadataGenerator / TokenIssuer
//! ```

pub mod api;
pub mod cache;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod llm;
pub mod mention;
pub mod orchestrator;
pub mod payment;
pub mod quota;
pub mod store;

pub use config::Config;
pub use orchestrator::{GateContext, MentionOrchestrator};
