//! Authority role: validate transfer requests, vote, settle certificates.
//!
//! An authority consumes `transfer_request` bundles delivered by the mesh
//! engine, applies the FastPay acceptance procedure scoped to the sender's
//! account, and relays its signed vote back toward the originator. Quorum
//! certificates arriving as `confirmation_request` bundles are settled
//! idempotently against the account store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::accounts::AccountStore;
use crate::committee::Committee;
use crate::crypto::Signer;
use crate::proto::{
    self, ConfirmationRequest, Envelope, MessageType, RelayBundle, SyncRequest, SyncResponse,
    TransferRequest, TransferResponse,
};
use crate::relay::{DeliveryHooks, MeshEngine};
use crate::stats::PerformanceStats;
use crate::timestamp::Timestamp;
use crate::transport::Transport;
use crate::types::{RejectReason, SignedTransferOrder, TransferOrder};

/// One authority of the committee.
pub struct Authority<T: Transport, S: Signer> {
    name: String,
    engine: Arc<MeshEngine<T>>,
    accounts: AccountStore,
    committee: Committee,
    signer: S,
    stats: PerformanceStats,
}

impl<T: Transport, S: Signer> Authority<T, S> {
    pub fn new(
        name: impl Into<String>,
        engine: Arc<MeshEngine<T>>,
        accounts: AccountStore,
        committee: Committee,
        signer: S,
    ) -> Self {
        Authority {
            name: name.into(),
            engine,
            accounts,
            committee,
            signer,
            stats: PerformanceStats::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    pub fn engine(&self) -> &Arc<MeshEngine<T>> {
        &self.engine
    }

    /// Decide one transfer order and return the vote to send back.
    ///
    /// The whole decision is serialized on the account store lock, so two
    /// concurrent requests for the same `(sender, sequence_number)` can
    /// never both be accepted.
    pub fn decide(&self, order: &TransferOrder, now: Timestamp) -> TransferResponse {
        let verdict = self.accounts.with_account(&order.sender, now, |account| {
            if order.sequence_number != account.sequence_number {
                return Err(RejectReason::SequenceMismatch);
            }
            if order.is_expired(now) {
                return Err(RejectReason::LockExpired);
            }
            if let Some(pending) = &account.pending_confirmation {
                if pending.order_id != order.order_id {
                    return Err(RejectReason::ConflictingLock);
                }
            }
            if account.spendable(&order.token_address) < order.amount as f64 {
                return Err(RejectReason::InsufficientFunds);
            }
            Ok(())
        });

        match verdict {
            Ok(()) => {
                let signature = self.signer.sign(order);
                self.accounts.record_pending(
                    SignedTransferOrder {
                        order_id: order.order_id,
                        transfer_order: order.clone(),
                        authority_signature: HashMap::from([(
                            self.name.clone(),
                            signature.clone(),
                        )]),
                        timestamp: now,
                    },
                    now,
                );
                tracing::info!(
                    order_id = %order.order_id,
                    sender = %order.sender,
                    sequence = order.sequence_number,
                    "accepted transfer order"
                );
                TransferResponse {
                    transfer_order: order.clone(),
                    success: true,
                    error: None,
                    authority: self.name.clone(),
                    authority_signature: Some(signature),
                }
            }
            Err(reason) => {
                self.stats.record_error();
                tracing::warn!(
                    order_id = %order.order_id,
                    sender = %order.sender,
                    %reason,
                    "rejected transfer order"
                );
                TransferResponse {
                    transfer_order: order.clone(),
                    success: false,
                    error: Some(reason),
                    authority: self.name.clone(),
                    authority_signature: None,
                }
            }
        }
    }

    /// Vote on a delivered request and relay the response toward the
    /// originating client.
    #[instrument(skip_all, fields(authority = %self.name, order_id = %request.transfer_order.order_id))]
    pub async fn handle_transfer_request(&self, bundle: &RelayBundle, request: TransferRequest) {
        let response = self.decide(&request.transfer_order, Timestamp::now());
        let payload = match proto::to_payload(&response) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to encode transfer response");
                return;
            }
        };
        // The response floods back with the *client* as original sender so
        // the originator-only delivery rule applies on the way home.
        let reached = self
            .engine
            .submit_from(
                &bundle.origin_address,
                MessageType::TransferResponse,
                payload,
                &bundle.order_id,
            )
            .await;
        if reached == 0 {
            tracing::warn!("vote could not leave this node; client retry will re-request");
        }
    }

    /// Settle a quorum certificate against the account store.
    #[instrument(skip_all, fields(authority = %self.name, order_id = %request.confirmation_order.order_id))]
    pub fn handle_confirmation(&self, request: &ConfirmationRequest) {
        let confirmation = &request.confirmation_order;
        match self
            .accounts
            .apply_confirmation(confirmation, &self.committee, Timestamp::now())
        {
            Ok(true) => {
                self.stats.record_transaction();
                tracing::info!(
                    sender = %confirmation.transfer_order.sender,
                    recipient = %confirmation.transfer_order.recipient,
                    amount = confirmation.transfer_order.amount,
                    "settled confirmed transfer"
                );
            }
            Ok(false) => {
                tracing::debug!("certificate already settled, ignoring");
            }
            Err(error) => {
                self.stats.record_error();
                tracing::warn!(%error, "refusing confirmation certificate");
            }
        }
    }

    /// Answer a direct sync request with account snapshots.
    pub async fn handle_sync_request(&self, envelope: &Envelope) {
        let request: SyncRequest = match proto::from_payload(&envelope.payload) {
            Ok(request) => request,
            Err(error) => {
                tracing::debug!(%error, "dropping undecodable sync request");
                return;
            }
        };
        self.stats.record_sync();
        let response = SyncResponse {
            accounts: self.accounts.snapshots(&request.account_addresses),
            sync_time: Timestamp::now(),
        };
        let payload = match proto::to_payload(&response) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to encode sync response");
                return;
            }
        };
        self.engine
            .send_direct(MessageType::SyncResponse, payload, &envelope.sender)
            .await;
    }
}

#[async_trait]
impl<T: Transport, S: Signer> DeliveryHooks for Authority<T, S> {
    async fn on_transfer_request(&self, bundle: &RelayBundle, request: TransferRequest) {
        self.handle_transfer_request(bundle, request).await;
    }

    async fn on_confirmation_request(&self, request: ConfirmationRequest) {
        self.handle_confirmation(&request);
    }

    async fn on_direct(&self, envelope: &Envelope) {
        match envelope.message_type {
            MessageType::SyncRequest => self.handle_sync_request(envelope).await,
            other => {
                tracing::debug!(message_type = %other, "ignoring direct message");
            }
        }
    }
}
