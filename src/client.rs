//! Client role: initiate transfers, collect votes, emit confirmations.
//!
//! A transfer is never fire-and-forget here. The order goes into the
//! buffered-transaction map the moment it is created, and a retry worker
//! keeps re-injecting it into the mesh until more than two thirds of the
//! committee has voted for it. Quorum triggers confirmation emission; a
//! quorum of identical rejections retires the transaction instead.
//!
//! The client also participates in store-carry-forward: transfer requests
//! it could not forward for other originators are buffered with their
//! relay metadata and re-flooded on the same cadence until they age out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::instrument;

use crate::committee::Committee;
use crate::crypto::{KeyPair, Signature, Signer};
use crate::proto::{
    self, ConfirmationRequest, Envelope, MessageType, RelayBundle, SyncRequest, TransferRequest,
    TransferResponse,
};
use crate::relay::{DeliveryHooks, MeshEngine};
use crate::stats::PerformanceStats;
use crate::timestamp::Timestamp;
use crate::transport::Transport;
use crate::types::{
    Address, AuthorityName, ConfirmationOrder, NodeId, RejectReason, TransactionStatus,
    TransferOrder,
};

/// A transaction buffered on the client while it gathers votes.
#[derive(Debug, Clone)]
pub struct BufferedTransaction {
    pub order: TransferOrder,
    /// Votes in arrival order, at most one per authority.
    pub signatures_received: Vec<(AuthorityName, Signature)>,
    /// Rejections in arrival order, at most one per authority.
    pub rejections: Vec<(AuthorityName, RejectReason)>,
    pub signatures_required: usize,
    pub created_at: Timestamp,
    pub last_retry: Timestamp,
    pub retry_count: u32,
    pub status: TransactionStatus,
    /// True for bundles stored-and-carried on behalf of another node.
    pub is_relay: bool,
    pub relay_metadata: Option<RelayBundle>,
}

impl BufferedTransaction {
    fn new(order: TransferOrder, signatures_required: usize, now: Timestamp) -> Self {
        BufferedTransaction {
            order,
            signatures_received: Vec::new(),
            rejections: Vec::new(),
            signatures_required,
            created_at: now,
            last_retry: now,
            retry_count: 0,
            status: TransactionStatus::Buffered,
            is_relay: false,
            relay_metadata: None,
        }
    }

    fn stored_relay(
        order: TransferOrder,
        bundle: RelayBundle,
        signatures_required: usize,
        now: Timestamp,
    ) -> Self {
        BufferedTransaction {
            is_relay: true,
            relay_metadata: Some(bundle),
            ..Self::new(order, signatures_required, now)
        }
    }

    pub fn has_quorum(&self) -> bool {
        self.signatures_received.len() >= self.signatures_required
    }

    /// Record a vote; the first response per authority wins, duplicates
    /// are ignored. Returns true when quorum is now reached.
    pub fn add_signature(&mut self, authority: &str, signature: Signature) -> bool {
        if !self
            .signatures_received
            .iter()
            .any(|(name, _)| name == authority)
        {
            self.signatures_received
                .push((authority.to_string(), signature));
        }
        self.has_quorum()
    }

    /// Record a rejection, one per authority. Returns the reason that
    /// reached a quorum of identical rejections, if any.
    pub fn add_rejection(&mut self, authority: &str, reason: RejectReason) -> Option<RejectReason> {
        if !self.rejections.iter().any(|(name, _)| name == authority) {
            self.rejections.push((authority.to_string(), reason));
        }
        let identical = self
            .rejections
            .iter()
            .filter(|(_, r)| *r == reason)
            .count();
        (identical >= self.signatures_required).then_some(reason)
    }
}

/// Mutable client-side payment state behind one lock.
#[derive(Debug)]
struct ClientState {
    sequence_number: u64,
    balance: i64,
    pending_transfer: Option<TransferOrder>,
    /// Votes collected so far, across transactions.
    sent_certificates: Vec<TransferResponse>,
}

/// Failed to start a transfer.
#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    #[error("a transfer is already pending at sequence {0}")]
    AlreadyPending(u64),
    #[error(transparent)]
    Codec(#[from] proto::DecodeError),
}

/// The MeshPay client node role.
pub struct Client<T: Transport, S: Signer = KeyPair> {
    name: NodeId,
    engine: Arc<MeshEngine<T>>,
    committee: Committee,
    signer: S,
    state: Mutex<ClientState>,
    buffered: Mutex<HashMap<String, BufferedTransaction>>,
    stats: PerformanceStats,
    retry_interval: f64,
    relay_bundle_max_age: f64,
}

fn recover<'a, T>(guard: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport, S: Signer> Client<T, S> {
    pub fn new(
        engine: Arc<MeshEngine<T>>,
        committee: Committee,
        signer: S,
        retry_interval: f64,
        relay_bundle_max_age: f64,
    ) -> Self {
        Client {
            name: engine.node_id().to_string(),
            engine,
            committee,
            signer,
            state: Mutex::new(ClientState {
                sequence_number: 1,
                balance: 0,
                pending_transfer: None,
                sent_certificates: Vec::new(),
            }),
            buffered: Mutex::new(HashMap::new()),
            stats: PerformanceStats::new(),
            retry_interval,
            relay_bundle_max_age,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<MeshEngine<T>> {
        &self.engine
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    pub fn retry_interval(&self) -> f64 {
        self.retry_interval
    }

    pub fn sequence_number(&self) -> u64 {
        recover(self.state.lock()).sequence_number
    }

    pub fn balance(&self) -> i64 {
        recover(self.state.lock()).balance
    }

    pub fn pending_transfer(&self) -> Option<TransferOrder> {
        recover(self.state.lock()).pending_transfer.clone()
    }

    /// Buffered transactions for operator inspection.
    pub fn buffered_transactions(&self) -> Vec<BufferedTransaction> {
        recover(self.buffered.lock()).values().cloned().collect()
    }

    pub fn transaction_status(&self, order_id: &str) -> Option<TransactionStatus> {
        recover(self.buffered.lock())
            .get(order_id)
            .map(|tx| tx.status)
    }

    /// Initiate a transfer by relaying the signed order through the mesh.
    ///
    /// The transaction is buffered before the first flood, so losing every
    /// first-attempt datagram costs one retry interval, never the payment.
    #[instrument(skip_all, fields(client = %self.name, recipient = %recipient, amount))]
    pub async fn transfer(
        &self,
        recipient: &str,
        token_address: &str,
        amount: u64,
    ) -> Result<TransactionStatus, TransferError> {
        let now = Timestamp::now();
        let order = {
            let mut state = recover(self.state.lock());
            if let Some(pending) = &state.pending_transfer {
                return Err(TransferError::AlreadyPending(pending.sequence_number));
            }
            let mut order = TransferOrder {
                order_id: uuid::Uuid::new_v4(),
                sender: self.name.clone(),
                recipient: recipient.to_string(),
                token_address: token_address.to_string(),
                amount,
                sequence_number: state.sequence_number,
                timestamp: now,
                signature: None,
                epoch: 0,
                ttl_seconds: 30.0,
            };
            order.signature = Some(self.signer.sign(&order));
            state.pending_transfer = Some(order.clone());
            order
        };

        let order_key = order.order_id.to_string();
        self.engine.mark_seen(&order_key, MessageType::TransferRequest);
        recover(self.buffered.lock()).insert(
            order_key.clone(),
            BufferedTransaction::new(order.clone(), self.committee.quorum_threshold(), now),
        );

        let payload = proto::to_payload(&TransferRequest {
            transfer_order: order,
        })?;
        let reached = self
            .engine
            .submit(MessageType::TransferRequest, payload, &order_key)
            .await;
        tracing::info!(
            order_id = %order_key,
            reached,
            quorum = self.committee.quorum_threshold(),
            "transfer order buffered and relayed"
        );
        Ok(TransactionStatus::Buffered)
    }

    fn validate_response(&self, response: &TransferResponse) -> bool {
        let state = recover(self.state.lock());
        if response.transfer_order.sender != self.name {
            tracing::warn!(order_id = %response.transfer_order.order_id, "response sender mismatch");
            return false;
        }
        if response.transfer_order.sequence_number != state.sequence_number {
            tracing::debug!(
                order_id = %response.transfer_order.order_id,
                got = response.transfer_order.sequence_number,
                expected = state.sequence_number,
                "response for stale sequence"
            );
            return false;
        }
        true
    }

    /// Handle one authority vote relayed back to us. Returns the
    /// certificate to broadcast once this vote completes a quorum.
    fn record_response(&self, response: TransferResponse) -> Option<ConfirmationOrder> {
        if !self.validate_response(&response) {
            return None;
        }
        let order_key = response.transfer_order.order_id.to_string();

        if !response.success {
            self.stats.record_error();
            let rejected = {
                let mut buffered = recover(self.buffered.lock());
                let tx = buffered.get_mut(&order_key)?;
                if tx.status.is_terminal() {
                    return None;
                }
                let reason = response.error?;
                tx.add_rejection(&response.authority, reason).map(|reason| {
                    tx.status = TransactionStatus::Rejected;
                    reason
                })
            };
            if let Some(reason) = rejected {
                tracing::warn!(order_id = %order_key, %reason, "transfer rejected by quorum");
                let mut state = recover(self.state.lock());
                if state
                    .pending_transfer
                    .as_ref()
                    .is_some_and(|pending| pending.order_id == response.transfer_order.order_id)
                {
                    state.pending_transfer = None;
                }
            }
            return None;
        }

        let signature = response.authority_signature.clone()?;
        {
            let mut state = recover(self.state.lock());
            state.sent_certificates.push(response.clone());
        }

        let mut buffered = recover(self.buffered.lock());
        let tx = buffered.get_mut(&order_key)?;
        if tx.status.is_terminal() {
            return None;
        }
        let quorum = tx.add_signature(&response.authority, signature);
        tracing::info!(
            order_id = %order_key,
            collected = tx.signatures_received.len(),
            required = tx.signatures_required,
            authority = %response.authority,
            "collected authority signature"
        );
        if !quorum {
            return None;
        }
        tx.status = TransactionStatus::Finalized;
        Some(self.build_confirmation(tx))
    }

    fn build_confirmation(&self, tx: &BufferedTransaction) -> ConfirmationOrder {
        ConfirmationOrder {
            order_id: tx.order.order_id,
            transfer_order: tx.order.clone(),
            authority_signatures: tx
                .signatures_received
                .iter()
                .map(|(_, signature)| signature.clone())
                .collect(),
            timestamp: Timestamp::now(),
            status: TransactionStatus::Confirmed,
        }
    }

    /// Relay the certificate and settle the transfer locally: clear the
    /// pending slot, advance the sequence, prune this order's
    /// certificates, and apply the debit.
    #[instrument(skip_all, fields(client = %self.name, order_id = %confirmation.order_id))]
    async fn broadcast_confirmation(&self, confirmation: ConfirmationOrder) {
        let order_key = confirmation.order_id.to_string();
        let amount = confirmation.transfer_order.amount;
        let payload = match proto::to_payload(&ConfirmationRequest {
            confirmation_order: confirmation,
        }) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to encode confirmation");
                return;
            }
        };
        let reached = self
            .engine
            .submit(MessageType::ConfirmationRequest, payload, &order_key)
            .await;
        tracing::info!(reached, "quorum reached, confirmation relayed");

        {
            let mut state = recover(self.state.lock());
            state.pending_transfer = None;
            state.sequence_number += 1;
            state
                .sent_certificates
                .retain(|cert| cert.transfer_order.order_id.to_string() != order_key);
            state.balance -= amount as i64;
        }
        self.stats.record_transaction();
    }

    /// A confirmation certificate naming us as recipient: apply the credit.
    fn apply_incoming_confirmation(&self, confirmation: &ConfirmationOrder) {
        let transfer = &confirmation.transfer_order;
        if transfer.recipient != self.name {
            return;
        }
        let mut state = recover(self.state.lock());
        state.balance += transfer.amount as i64;
        drop(state);
        tracing::info!(
            order_id = %transfer.order_id,
            sender = %transfer.sender,
            amount = transfer.amount,
            "incoming transfer confirmed"
        );
    }

    /// Buffer a transfer-request bundle we could not forward, so the retry
    /// loop can re-inject it over a later topology snapshot.
    fn buffer_stalled_relay(&self, bundle: RelayBundle) {
        if bundle.original_sender_id == self.name {
            return;
        }
        let request: TransferRequest = match proto::from_payload(&bundle.inner_payload) {
            Ok(request) => request,
            Err(error) => {
                tracing::debug!(%error, "not buffering undecodable stalled bundle");
                return;
            }
        };
        let order_key = bundle.order_id.clone();
        let mut buffered = recover(self.buffered.lock());
        if buffered.contains_key(&order_key) {
            return;
        }
        tracing::info!(
            order_id = %order_key,
            origin = %bundle.original_sender_id,
            ttl = bundle.ttl,
            "storing stalled relay bundle for carry-forward"
        );
        buffered.insert(
            order_key,
            BufferedTransaction::stored_relay(
                request.transfer_order,
                bundle,
                self.committee.quorum_threshold(),
                Timestamp::now(),
            ),
        );
    }

    /// One pass of the buffered-retry loop.
    ///
    /// Re-injects every still-buffered transaction, drops aged-out
    /// store-carry-forward bundles, and emits confirmations for
    /// transactions whose quorum completed since the last pass.
    #[instrument(skip_all, fields(client = %self.name))]
    pub async fn retry_tick(&self, now: Timestamp) {
        enum Action {
            Resubmit(TransferOrder),
            Reflood(RelayBundle),
        }

        let mut actions: Vec<(String, Action)> = Vec::new();
        {
            let mut buffered = recover(self.buffered.lock());
            buffered.retain(|order_key, tx| {
                if tx.status != TransactionStatus::Buffered {
                    return true;
                }
                if tx.is_relay && now.elapsed_since(tx.created_at) > self.relay_bundle_max_age {
                    tracing::info!(order_id = %order_key, "dropping aged-out relay bundle");
                    return false;
                }
                tx.retry_count += 1;
                tx.last_retry = now;
                match (tx.is_relay, &tx.relay_metadata) {
                    (true, Some(bundle)) => {
                        actions.push((order_key.clone(), Action::Reflood(bundle.clone())));
                    }
                    _ => {
                        actions.push((order_key.clone(), Action::Resubmit(tx.order.clone())));
                    }
                }
                true
            });
        }

        if !actions.is_empty() {
            tracing::info!(retrying = actions.len(), "buffered-retry pass");
        }
        for (order_key, action) in actions {
            // Re-arm the dedup slot so the fresh flood is not discarded by
            // nodes that saw an earlier attempt.
            self.engine
                .clear_seen(&order_key, MessageType::TransferRequest);
            self.engine
                .mark_seen(&order_key, MessageType::TransferRequest);
            match action {
                Action::Resubmit(order) => {
                    let payload = match proto::to_payload(&TransferRequest {
                        transfer_order: order,
                    }) {
                        Ok(payload) => payload,
                        Err(error) => {
                            tracing::warn!(%error, "failed to encode retry");
                            continue;
                        }
                    };
                    self.engine
                        .submit(MessageType::TransferRequest, payload, &order_key)
                        .await;
                }
                Action::Reflood(bundle) => {
                    self.engine.resubmit(&bundle).await;
                }
            }
        }

        // Votes may have completed a quorum between ticks without tipping
        // it at arrival time, e.g. after a dedup re-arm.
        let mut confirmations: Vec<ConfirmationOrder> = Vec::new();
        {
            let mut buffered = recover(self.buffered.lock());
            for tx in buffered.values_mut() {
                if tx.status == TransactionStatus::Buffered && tx.has_quorum() {
                    tx.status = TransactionStatus::Finalized;
                    confirmations.push(self.build_confirmation(tx));
                }
            }
        }
        for confirmation in confirmations {
            self.broadcast_confirmation(confirmation).await;
        }
    }

    /// Ask every committee member for fresh account snapshots.
    pub async fn request_sync(&self) {
        let payload = match proto::to_payload(&SyncRequest {
            last_sync_time: Timestamp::now(),
            account_addresses: vec![self.name.clone()],
        }) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to encode sync request");
                return;
            }
        };
        for member in self.committee.members() {
            self.engine
                .send_direct(MessageType::SyncRequest, payload.clone(), member)
                .await;
        }
    }

    fn handle_sync_response(&self, envelope: &Envelope) {
        match proto::from_payload::<proto::SyncResponse>(&envelope.payload) {
            Ok(response) => {
                self.stats.record_sync();
                tracing::info!(
                    authority = %envelope.sender.node_id,
                    accounts = response.accounts.len(),
                    "received account sync"
                );
            }
            Err(error) => {
                tracing::debug!(%error, "dropping undecodable sync response");
            }
        }
    }
}

#[async_trait]
impl<T: Transport, S: Signer> DeliveryHooks for Client<T, S> {
    async fn on_transfer_response(&self, response: TransferResponse) {
        if let Some(confirmation) = self.record_response(response) {
            self.broadcast_confirmation(confirmation).await;
        }
    }

    async fn on_confirmation_request(&self, request: ConfirmationRequest) {
        self.apply_incoming_confirmation(&request.confirmation_order);
    }

    async fn on_relay_stalled(&self, bundle: RelayBundle) {
        self.buffer_stalled_relay(bundle);
    }

    async fn on_direct(&self, envelope: &Envelope) {
        match envelope.message_type {
            MessageType::SyncResponse => self.handle_sync_response(envelope),
            other => {
                tracing::debug!(message_type = %other, "ignoring direct message");
            }
        }
    }
}

/// Snapshot of a client for the operator shell.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClientSummary {
    pub name: NodeId,
    pub sequence_number: u64,
    pub balance: i64,
    pub pending_order: Option<String>,
    pub buffered: usize,
    pub neighbors: Vec<NodeId>,
}

impl<T: Transport, S: Signer> Client<T, S> {
    pub fn summary(&self) -> ClientSummary {
        let state = recover(self.state.lock());
        ClientSummary {
            name: self.name.clone(),
            sequence_number: state.sequence_number,
            balance: state.balance,
            pending_order: state
                .pending_transfer
                .as_ref()
                .map(|order| order.order_id.to_string()),
            buffered: recover(self.buffered.lock()).len(),
            neighbors: self.engine.neighbors().snapshot().into_keys().collect(),
        }
    }

    /// Addresses of the committee, for the operator shell.
    pub fn committee_addresses(&self) -> Vec<Address> {
        self.committee.members().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::neighbors::NeighborTable;
    use crate::types::NodeRole;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use uuid::Uuid;

    struct NullTransport;

    impl Transport for NullTransport {
        async fn send(&self, _envelope: &Envelope, _dst: SocketAddr) -> bool {
            false
        }
        async fn recv(&self, _timeout: Duration) -> Option<Envelope> {
            None
        }
        async fn close(&self) {}
    }

    fn address(node_id: &str, role: NodeRole, port: u16) -> Address {
        Address::new(node_id, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port, role)
    }

    fn client() -> Client<NullTransport, KeyPair> {
        let c1 = address("c1", NodeRole::Client, 9001);
        let engine = Arc::new(MeshEngine::new(
            c1,
            Arc::new(NullTransport),
            NeighborTable::new(15.0),
            8,
        ));
        let committee = Committee::new(vec![
            address("a1", NodeRole::Authority, 8001),
            address("a2", NodeRole::Authority, 8002),
            address("a3", NodeRole::Authority, 8003),
            address("a4", NodeRole::Authority, 8004),
        ]);
        Client::new(engine, committee, KeyPair("secret-c1".into()), 5.0, 120.0)
    }

    fn vote(order: &TransferOrder, authority: &str) -> TransferResponse {
        TransferResponse {
            transfer_order: order.clone(),
            success: true,
            error: None,
            authority: authority.to_string(),
            authority_signature: Some(KeyPair(format!("secret-{authority}")).sign(order)),
        }
    }

    fn rejection(order: &TransferOrder, authority: &str, reason: RejectReason) -> TransferResponse {
        TransferResponse {
            transfer_order: order.clone(),
            success: false,
            error: Some(reason),
            authority: authority.to_string(),
            authority_signature: None,
        }
    }

    #[tokio::test]
    async fn transfer_buffers_before_flooding() {
        let client = client();
        let status = client.transfer("c2", "0xXTZ", 10).await.unwrap();
        assert_eq!(status, TransactionStatus::Buffered);
        assert_eq!(client.buffered_transactions().len(), 1);
        let pending = client.pending_transfer().unwrap();
        assert_eq!(pending.sequence_number, 1);
        assert!(client
            .engine()
            .has_seen(&pending.order_id.to_string(), MessageType::TransferRequest));
        // A second transfer while one is pending is refused.
        assert!(client.transfer("c3", "0xXTZ", 5).await.is_err());
    }

    #[tokio::test]
    async fn quorum_finalizes_and_settles_locally() {
        let client = client();
        client.transfer("c2", "0xXTZ", 10).await.unwrap();
        let order = client.pending_transfer().unwrap();
        let order_key = order.order_id.to_string();

        client.on_transfer_response(vote(&order, "a1")).await;
        client.on_transfer_response(vote(&order, "a2")).await;
        assert_eq!(
            client.transaction_status(&order_key),
            Some(TransactionStatus::Buffered)
        );

        client.on_transfer_response(vote(&order, "a3")).await;
        assert_eq!(
            client.transaction_status(&order_key),
            Some(TransactionStatus::Finalized)
        );
        assert_eq!(client.sequence_number(), 2);
        assert_eq!(client.balance(), -10);
        assert!(client.pending_transfer().is_none());
        assert_eq!(client.stats().snapshot().transaction_count, 1);
    }

    #[tokio::test]
    async fn duplicate_votes_from_one_authority_do_not_count() {
        let client = client();
        client.transfer("c2", "0xXTZ", 10).await.unwrap();
        let order = client.pending_transfer().unwrap();

        client.on_transfer_response(vote(&order, "a1")).await;
        client.on_transfer_response(vote(&order, "a1")).await;
        client.on_transfer_response(vote(&order, "a1")).await;
        let buffered = client.buffered_transactions();
        assert_eq!(buffered[0].signatures_received.len(), 1);
        assert_eq!(buffered[0].status, TransactionStatus::Buffered);
    }

    #[tokio::test]
    async fn stale_sequence_votes_are_ignored() {
        let client = client();
        client.transfer("c2", "0xXTZ", 10).await.unwrap();
        let mut order = client.pending_transfer().unwrap();
        order.sequence_number = 9;
        client.on_transfer_response(vote(&order, "a1")).await;
        assert!(client.buffered_transactions()[0]
            .signatures_received
            .is_empty());
    }

    #[tokio::test]
    async fn rejection_quorum_retires_the_transaction() {
        let client = client();
        client.transfer("c2", "0xXTZ", 10).await.unwrap();
        let order = client.pending_transfer().unwrap();
        let order_key = order.order_id.to_string();

        for authority in ["a1", "a2"] {
            client
                .on_transfer_response(rejection(&order, authority, RejectReason::InsufficientFunds))
                .await;
        }
        assert_eq!(
            client.transaction_status(&order_key),
            Some(TransactionStatus::Buffered)
        );
        client
            .on_transfer_response(rejection(&order, "a3", RejectReason::InsufficientFunds))
            .await;
        assert_eq!(
            client.transaction_status(&order_key),
            Some(TransactionStatus::Rejected)
        );
        assert!(client.pending_transfer().is_none());
        // Terminal: a late vote cannot resurrect it.
        client.on_transfer_response(vote(&order, "a4")).await;
        assert_eq!(
            client.transaction_status(&order_key),
            Some(TransactionStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn mixed_rejection_reasons_do_not_retire() {
        let client = client();
        client.transfer("c2", "0xXTZ", 10).await.unwrap();
        let order = client.pending_transfer().unwrap();
        client
            .on_transfer_response(rejection(&order, "a1", RejectReason::InsufficientFunds))
            .await;
        client
            .on_transfer_response(rejection(&order, "a2", RejectReason::SequenceMismatch))
            .await;
        client
            .on_transfer_response(rejection(&order, "a3", RejectReason::ConflictingLock))
            .await;
        assert_eq!(
            client.transaction_status(&order.order_id.to_string()),
            Some(TransactionStatus::Buffered)
        );
    }

    #[tokio::test]
    async fn retry_tick_increments_and_rearms() {
        let client = client();
        client.transfer("c2", "0xXTZ", 10).await.unwrap();
        let order = client.pending_transfer().unwrap();
        let order_key = order.order_id.to_string();

        client.retry_tick(Timestamp::now()).await;
        client.retry_tick(Timestamp::now()).await;
        client.retry_tick(Timestamp::now()).await;

        let buffered = client.buffered_transactions();
        assert_eq!(buffered[0].retry_count, 3);
        assert_eq!(buffered[0].status, TransactionStatus::Buffered);
        assert!(client.engine().has_seen(&order_key, MessageType::TransferRequest));
    }

    #[tokio::test]
    async fn incoming_confirmation_credits_recipient() {
        let client = client();
        let order = TransferOrder {
            order_id: Uuid::new_v4(),
            sender: "c9".into(),
            recipient: "c1".into(),
            token_address: "0xXTZ".into(),
            amount: 25,
            sequence_number: 4,
            timestamp: Timestamp::now(),
            signature: None,
            epoch: 0,
            ttl_seconds: 30.0,
        };
        let confirmation = ConfirmationOrder {
            order_id: order.order_id,
            transfer_order: order,
            authority_signatures: vec![Signature("s1".into()), Signature("s2".into())],
            timestamp: Timestamp::now(),
            status: TransactionStatus::Confirmed,
        };
        client
            .on_confirmation_request(ConfirmationRequest {
                confirmation_order: confirmation,
            })
            .await;
        assert_eq!(client.balance(), 25);
    }

    #[tokio::test]
    async fn stalled_relay_bundles_age_out() {
        let client = client();
        let order = TransferOrder {
            order_id: Uuid::new_v4(),
            sender: "c9".into(),
            recipient: "c2".into(),
            token_address: "0xXTZ".into(),
            amount: 5,
            sequence_number: 1,
            timestamp: Timestamp(1000.0),
            signature: None,
            epoch: 0,
            ttl_seconds: 30.0,
        };
        let bundle = RelayBundle {
            original_sender_id: "c9".into(),
            origin_address: address("c9", NodeRole::Client, 9009),
            inner_type: MessageType::TransferRequest,
            inner_payload: proto::to_payload(&TransferRequest {
                transfer_order: order.clone(),
            })
            .unwrap(),
            order_id: order.order_id.to_string(),
            ttl: 5,
            hop_path: vec!["c9".into(), "c1".into()],
        };
        client.on_relay_stalled(bundle).await;
        let buffered = client.buffered_transactions();
        assert_eq!(buffered.len(), 1);
        assert!(buffered[0].is_relay);

        // Within the age limit the bundle is retried and kept.
        let created = buffered[0].created_at;
        client.retry_tick(created + 10.0).await;
        assert_eq!(client.buffered_transactions().len(), 1);
        assert_eq!(client.buffered_transactions()[0].retry_count, 1);

        // Past the age limit it is dropped.
        client.retry_tick(created + 121.0).await;
        assert!(client.buffered_transactions().is_empty());
    }

    #[tokio::test]
    async fn own_orders_are_not_stored_as_relays() {
        let client = client();
        client.transfer("c2", "0xXTZ", 10).await.unwrap();
        let order = client.pending_transfer().unwrap();
        let bundle = RelayBundle {
            original_sender_id: "c1".into(),
            origin_address: address("c1", NodeRole::Client, 9001),
            inner_type: MessageType::TransferRequest,
            inner_payload: serde_json::Value::Null,
            order_id: order.order_id.to_string(),
            ttl: 5,
            hop_path: vec!["c1".into()],
        };
        client.on_relay_stalled(bundle).await;
        let buffered = client.buffered_transactions();
        assert_eq!(buffered.len(), 1);
        assert!(!buffered[0].is_relay);
    }
}
