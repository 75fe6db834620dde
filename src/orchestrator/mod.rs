//! Mention orchestrator - processes one mention end-to-end.
//!
//! # Flow
//! ```text
//! classify(stripped text)
//!   EMPTY           -> analysis under a per-message fingerprint, always free
//!   TOKEN_CREATION  -> propose metadata, register PENDING
//!   QUESTION
//!     yes/no + proposal -> CONFIRMED (issue) | REJECTED | EXPIRED (timeout)
//!     names @other      -> matching: cache -> free credit -> payment -> analysis
//!     otherwise         -> personal: cache -> analysis (free)
//! ```
//! No error escapes [`MentionOrchestrator::process_mention`]; every failure is
//! folded into the [`MentionResponse`]. Cached paths hold the fingerprint's
//! compute guard from lookup to put, so one fingerprint is computed and billed
//! once however many requests race for it.
//!
//! Store failures do not stop a request: the cache degrades to a miss, the
//! quota to zero free uses, and a served result carries `hits = 1` with a
//! non-fatal SYSTEM_ERROR.

mod context;
mod response;

pub use context::{Collaborators, GateContext};
pub use response::{MentionData, MentionResponse};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{AnalysisCacheEntry, AnalysisKind, Fingerprint};
use crate::collaborators::SubjectData;
use crate::confirmation::{Lookup, PendingConfirmation};
use crate::error::ErrorCode;
use crate::mention::{
    classify, extract_target, normalize_user_id, parse_reply, strip_handle, MentionEvent,
    MentionType, Reply,
};
use crate::store::StoreError;

/// Drives mentions through the cache, quota, payment and confirmation components.
pub struct MentionOrchestrator {
    ctx: Arc<GateContext>,
}

impl MentionOrchestrator {
    pub fn new(ctx: Arc<GateContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<GateContext> {
        &self.ctx
    }

    /// Process one mention. Never fails; errors are reported in the response.
    pub async fn process_mention(&self, event: &MentionEvent) -> MentionResponse {
        let user_id = normalize_user_id(&event.source_user_id);
        let stripped = strip_handle(&event.mention_text, &self.ctx.agent_handle);
        let mention_type = classify(&stripped);

        info!(
            user_id = %user_id,
            correlation_id = %event.correlation_id,
            mention_type = %mention_type,
            "Processing mention"
        );

        if user_id.is_empty() {
            return MentionResponse::fail(
                MentionData::new(mention_type, 0),
                ErrorCode::SystemError,
                "Mention has no source user",
            );
        }

        match mention_type {
            MentionType::Empty => self.process_empty(&user_id, event).await,
            MentionType::TokenCreation => self.propose_token(&user_id, &stripped, event).await,
            MentionType::Question => {
                if let Some(reply) = parse_reply(&stripped) {
                    if let Some(response) = self.answer_proposal(&user_id, reply).await {
                        return response;
                    }
                }
                match extract_target(&stripped, &user_id, &self.ctx.agent_handle) {
                    Some(target) => self.process_match(&user_id, &target, &stripped, event).await,
                    None => self.process_personal(&user_id, &stripped).await,
                }
            }
        }
    }

    /// Free credits to report. A ledger failure reports zero.
    async fn current_free_uses(&self, user_id: &str) -> u32 {
        match self.ctx.quota.get_or_create(user_id).await {
            Ok(quota) => quota.free_uses_left,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Quota read failed, reporting zero free uses");
                0
            }
        }
    }

    /// Cache lookup that degrades to a miss on store failure.
    async fn cached(
        &self,
        fp: &Fingerprint,
        store_failure: &mut Option<String>,
    ) -> Option<AnalysisCacheEntry> {
        match self.ctx.cache.record_hit(fp).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Cache read failed, recomputing");
                note(store_failure, "Cache read failed", &e);
                None
            }
        }
    }

    /// Cache a fresh payload and return its hit count. A store failure still
    /// serves the result, as a first hit.
    async fn remember(
        &self,
        fp: &Fingerprint,
        payload: serde_json::Value,
        store_failure: &mut Option<String>,
    ) -> u64 {
        match self.ctx.cache.put(fp, payload).await {
            Ok(entry) => entry.hits,
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Cache write failed, result not cached");
                note(store_failure, "Cache write failed", &e);
                1
            }
        }
    }

    /// EMPTY: always computed under a per-message fingerprint, never billed.
    async fn process_empty(&self, user_id: &str, event: &MentionEvent) -> MentionResponse {
        let mut data = MentionData::new(MentionType::Empty, self.ctx.quota.default_free_uses());
        let fp = Fingerprint::empty(user_id, &event.correlation_id);
        let subject = SubjectData::new(user_id, "");

        match self
            .ctx
            .analysis
            .generate(AnalysisKind::Personal, &subject, None)
            .await
        {
            Ok(payload) => {
                let mut store_failure = None;
                data.hits = self.remember(&fp, payload.clone(), &mut store_failure).await;
                data.analysis = Some(payload);
                MentionResponse::served(data, store_failure)
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Empty-mention analysis failed");
                MentionResponse::fail(data, e.code(), e.to_string())
            }
        }
    }

    /// QUESTION without a target: personal analysis, cached, never billed.
    async fn process_personal(&self, user_id: &str, text: &str) -> MentionResponse {
        let fp = Fingerprint::personal(user_id);
        let _computing = self.ctx.cache.compute_guard(&fp).await;
        let mut store_failure = None;

        if let Some(entry) = self.cached(&fp, &mut store_failure).await {
            let mut data =
                MentionData::new(MentionType::Question, self.current_free_uses(user_id).await);
            data.analysis = Some(entry.payload);
            data.hits = entry.hits;
            data.cached = true;
            return MentionResponse::ok(data);
        }

        let subject = SubjectData::new(user_id, text);
        let payload = match self
            .ctx
            .analysis
            .generate(AnalysisKind::Personal, &subject, None)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Personal analysis failed");
                let data =
                    MentionData::new(MentionType::Question, self.current_free_uses(user_id).await);
                return MentionResponse::fail(data, e.code(), e.to_string());
            }
        };

        let free_uses_left = match self
            .ctx
            .quota
            .record_analysis(user_id, AnalysisKind::Personal, None)
            .await
        {
            Ok(decision) => decision.free_uses_left,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Personal analysis not audited");
                note(&mut store_failure, "Quota unavailable", &e);
                0
            }
        };

        let mut data = MentionData::new(MentionType::Question, free_uses_left);
        data.hits = self.remember(&fp, payload.clone(), &mut store_failure).await;
        data.analysis = Some(payload);
        MentionResponse::served(data, store_failure)
    }

    /// Matching analysis of `user_id` against `target_id`.
    ///
    /// A cache hit is free. A miss spends one free credit, or charges the
    /// author through the payment gate once credit is gone; the analysis runs
    /// only after one of the two succeeds.
    pub async fn process_match(
        &self,
        user_id: &str,
        target_id: &str,
        text: &str,
        event: &MentionEvent,
    ) -> MentionResponse {
        let fp = Fingerprint::matching(user_id, target_id);
        let _computing = self.ctx.cache.compute_guard(&fp).await;
        let mut store_failure = None;

        if let Some(entry) = self.cached(&fp, &mut store_failure).await {
            let mut data =
                MentionData::new(MentionType::Question, self.current_free_uses(user_id).await);
            data.match_result = Some(entry.payload);
            data.hits = entry.hits;
            data.cached = true;
            return MentionResponse::ok(data);
        }

        let decision = match self
            .ctx
            .quota
            .record_analysis(user_id, AnalysisKind::Matching, Some(target_id))
            .await
        {
            Ok(decision) => Some(decision),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Quota unavailable, treating as no free uses");
                note(&mut store_failure, "Quota unavailable", &e);
                None
            }
        };

        let mut data = MentionData::new(MentionType::Question, 0);
        let used_free_credit = match decision {
            Some(d) if d.success => {
                data.free_uses_left = d.free_uses_left;
                true
            }
            _ => {
                data.payment_required = true;
                let cost = self.ctx.payment.cost_of(AnalysisKind::Matching);
                debug!(user_id = %user_id, fingerprint = %fp, %cost, "Charging for matching analysis");
                let outcome = self
                    .ctx
                    .payment
                    .validate_and_process_payment(
                        &event.creator_address,
                        cost,
                        AnalysisKind::Matching,
                    )
                    .await;

                if !outcome.success {
                    let code = outcome.error_kind.unwrap_or(ErrorCode::PaymentError);
                    let message = outcome
                        .message
                        .unwrap_or_else(|| "Payment failed".to_string());
                    data.approval = outcome.approval_data;
                    info!(user_id = %user_id, code = %code, "Matching analysis blocked on payment");
                    return MentionResponse::fail(data, code, message);
                }

                data.transaction_ref = outcome.transaction_ref.clone();
                if let Err(e) = self
                    .ctx
                    .quota
                    .record_successful_payment(
                        user_id,
                        target_id,
                        outcome.transaction_ref.as_deref(),
                    )
                    .await
                {
                    warn!(user_id = %user_id, error = %e, "Paid analysis not recorded in quota history");
                    note(&mut store_failure, "Payment not recorded", &e);
                }
                false
            }
        };

        let subject = SubjectData::new(user_id, text);
        let target = SubjectData::new(target_id, "");
        let payload = match self
            .ctx
            .analysis
            .generate(AnalysisKind::Matching, &subject, Some(&target))
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(user_id = %user_id, target = %target_id, error = %e, "Matching analysis failed");
                if used_free_credit {
                    match self.ctx.quota.grant_free_uses(user_id, 1).await {
                        Ok(quota) => data.free_uses_left = quota.free_uses_left,
                        Err(e) => warn!(user_id = %user_id, error = %e, "Free credit not refunded"),
                    }
                }
                return MentionResponse::fail(data, e.code(), e.to_string());
            }
        };

        data.hits = self.remember(&fp, payload.clone(), &mut store_failure).await;
        data.match_result = Some(payload);
        MentionResponse::served(data, store_failure)
    }

    /// TOKEN_CREATION: propose metadata and wait for a yes/no. Replaces any
    /// earlier proposal.
    async fn propose_token(
        &self,
        user_id: &str,
        text: &str,
        event: &MentionEvent,
    ) -> MentionResponse {
        let mut data =
            MentionData::new(MentionType::TokenCreation, self.current_free_uses(user_id).await);

        let metadata = match self
            .ctx
            .metadata
            .propose(&SubjectData::new(user_id, text))
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Token metadata generation failed");
                return MentionResponse::fail(data, e.code(), e.to_string());
            }
        };

        match self
            .ctx
            .confirmations
            .propose(user_id, metadata, &event.creator_address)
            .await
        {
            Ok(pending) => {
                data.token_proposal = Some(pending.proposed_metadata);
                data.pending_confirmation = Some(true);
                MentionResponse::ok(data)
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Token proposal not stored");
                MentionResponse::fail(data, ErrorCode::SystemError, e.to_string())
            }
        }
    }

    /// Resolve the user's proposal with a yes/no. `None` when there is
    /// nothing to answer, so the text is handled as an ordinary question.
    async fn answer_proposal(&self, user_id: &str, reply: Reply) -> Option<MentionResponse> {
        let confirmations = &self.ctx.confirmations;
        let lookup = match reply {
            Reply::Affirmative => confirmations.claim(user_id).await,
            Reply::Negative => confirmations.reject(user_id).await,
        };

        let mut data =
            MentionData::new(MentionType::TokenCreation, self.current_free_uses(user_id).await);
        let pending = match lookup {
            Ok(Lookup::None) => return None,
            Ok(Lookup::Expired(_)) => {
                data.pending_confirmation = Some(false);
                return Some(MentionResponse::fail(
                    data,
                    ErrorCode::TokenConfirmationTimeout,
                    format!(
                        "Token proposal expired after {}s",
                        confirmations.timeout().as_secs()
                    ),
                ));
            }
            Ok(Lookup::Pending(pending)) => pending,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Confirmation register unavailable");
                return Some(MentionResponse::fail(
                    data,
                    ErrorCode::SystemError,
                    e.to_string(),
                ));
            }
        };

        Some(match reply {
            Reply::Negative => {
                data.token_proposal = Some(pending.proposed_metadata);
                data.pending_confirmation = Some(false);
                MentionResponse::ok(data)
            }
            Reply::Affirmative => self.issue(pending, data).await,
        })
    }

    /// PENDING -> CONFIRMED. On failure the proposal is put back so the user
    /// can answer again within the window.
    async fn issue(&self, pending: PendingConfirmation, mut data: MentionData) -> MentionResponse {
        let user_id = pending.user_id.clone();
        match self
            .ctx
            .issuer
            .issue(&pending.proposed_metadata, &pending.creator_address)
            .await
        {
            Ok(token) => {
                info!(
                    user_id = %user_id,
                    symbol = %pending.proposed_metadata.symbol,
                    contract = %token.contract_address,
                    "Token issued"
                );
                data.transaction_ref = Some(token.transaction_ref.clone());
                data.token_proposal = Some(pending.proposed_metadata);
                data.token = Some(token);
                data.pending_confirmation = Some(false);
                MentionResponse::ok(data)
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Token issuance failed");
                let restored = match self.ctx.confirmations.restore(pending).await {
                    Ok(restored) => restored,
                    Err(store_err) => {
                        warn!(user_id = %user_id, error = %store_err, "Token proposal not restored");
                        false
                    }
                };
                data.pending_confirmation = Some(restored);
                MentionResponse::fail(data, e.code(), e.to_string())
            }
        }
    }
}

/// Keep the first store failure of a request for its response.
fn note(store_failure: &mut Option<String>, what: &str, e: &StoreError) {
    store_failure.get_or_insert_with(|| format!("{}: {}", what, e));
}
