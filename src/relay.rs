//! TTL-bounded controlled flooding over the opportunistic mesh.
//!
//! The [`MeshEngine`] is the one component every node embeds, client and
//! authority alike. It owns the neighbor table and the per-order
//! deduplication set, and presents three ports to the surrounding role
//! logic: [`MeshEngine::submit`] (inject a new bundle), [`MeshEngine::process`]
//! (handle an inbound `mesh_relay` envelope, invoking the role's
//! [`DeliveryHooks`] for bundles addressed here), and
//! [`MeshEngine::neighbors`] (read-only view of live peers).
//!
//! Forwarding discipline:
//! - every bundle dies within `relay_ttl` hops;
//! - split horizon: a bundle is never sent to a node already in its
//!   `hop_path`, so no causal chain loops;
//! - the dedup set bounds how often each node processes a given order,
//!   with one deliberate exception for `transfer_response` bundles
//!   addressed to this node: the same transfer legitimately attracts one
//!   signed response per authority, and the originator must collect all
//!   of them. Dropping that exception caps a client at a single signature
//!   and quorum is never reached.

use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::neighbors::NeighborTable;
use crate::proto::{
    self, ConfirmationRequest, Envelope, MessageType, RelayBundle, TransferRequest,
    TransferResponse,
};
use crate::transport::Transport;
use crate::types::{Address, NodeRole};

/// Typed delivery callbacks a role registers with the engine.
///
/// The engine routes locally delivered bundles through these; roles
/// override only what they consume. Polymorphism is over this callback
/// set, not over node inheritance.
#[async_trait]
pub trait DeliveryHooks: Send + Sync {
    /// A transfer request delivered to this node (authorities only).
    async fn on_transfer_request(&self, bundle: &RelayBundle, request: TransferRequest) {
        let _ = (bundle, request);
    }

    /// An authority's vote delivered back to the originating client.
    async fn on_transfer_response(&self, response: TransferResponse) {
        let _ = response;
    }

    /// A confirmation certificate delivered to an authority for settlement
    /// or to the payment recipient.
    async fn on_confirmation_request(&self, request: ConfirmationRequest) {
        let _ = request;
    }

    /// A forwarded transfer request that could not reach any next hop.
    /// Store-carry-forward roles buffer it and re-inject later.
    async fn on_relay_stalled(&self, bundle: RelayBundle) {
        let _ = bundle;
    }

    /// A direct (non-relayed) envelope: sync traffic and the like.
    async fn on_direct(&self, envelope: &Envelope) {
        let _ = envelope;
    }
}

/// Hooks for pure relay nodes (gateways): forward everything, consume
/// nothing.
pub struct PassiveHooks;

#[async_trait]
impl DeliveryHooks for PassiveHooks {}

/// The mesh engine: controlled flooding with dedup and hop-path tracking.
pub struct MeshEngine<T: Transport> {
    address: Address,
    transport: Arc<T>,
    neighbors: NeighborTable,
    seen_order_ids: DashSet<String>,
    relay_ttl: u8,
}

impl<T: Transport> MeshEngine<T> {
    pub fn new(address: Address, transport: Arc<T>, neighbors: NeighborTable, relay_ttl: u8) -> Self {
        MeshEngine {
            address,
            transport,
            neighbors,
            seen_order_ids: DashSet::new(),
            relay_ttl,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn node_id(&self) -> &str {
        &self.address.node_id
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Record an order as processed for one inner type, so inbound copies
    /// dedup against it.
    pub fn mark_seen(&self, order_id: &str, inner_type: MessageType) {
        self.seen_order_ids
            .insert(format!("{}/{}", order_id, inner_type));
    }

    /// Forget an order for one inner type. The retry loop re-arms the slot
    /// before every re-injection so a previously deduplicated order can
    /// flow again.
    pub fn clear_seen(&self, order_id: &str, inner_type: MessageType) {
        self.seen_order_ids
            .remove(&format!("{}/{}", order_id, inner_type));
    }

    pub fn has_seen(&self, order_id: &str, inner_type: MessageType) -> bool {
        self.seen_order_ids
            .contains(&format!("{}/{}", order_id, inner_type))
    }

    /// Deduplication key for one bundle.
    ///
    /// Keys are scoped per inner type, so the confirmation for an order
    /// still flows through nodes that relayed its request. Response
    /// bundles are further scoped per authority: every distinct vote for
    /// an order must traverse shared relay chains, or a client behind one
    /// could collect at most a single signature.
    fn dedup_key(&self, bundle: &RelayBundle) -> String {
        if bundle.inner_type == MessageType::TransferResponse {
            if let Ok(response) = proto::from_payload::<TransferResponse>(&bundle.inner_payload) {
                return format!(
                    "{}/{}/{}",
                    bundle.order_id, bundle.inner_type, response.authority
                );
            }
        }
        format!("{}/{}", bundle.order_id, bundle.inner_type)
    }

    /// Inject a new bundle originated by this node.
    ///
    /// Returns the number of neighbors the bundle reached. Zero is not an
    /// error: the buffered-retry loop re-injects on the next cycle,
    /// possibly over a different topology snapshot.
    pub async fn submit(
        &self,
        inner_type: MessageType,
        inner_payload: serde_json::Value,
        order_id: &str,
    ) -> usize {
        let origin = self.address.clone();
        self.submit_from(&origin, inner_type, inner_payload, order_id)
            .await
    }

    /// Inject a bundle on behalf of `origin`.
    ///
    /// Authorities use this to send a `transfer_response` whose
    /// `original_sender_id` is the *client's* node id, so the response
    /// floods back toward the originator.
    pub async fn submit_from(
        &self,
        origin: &Address,
        inner_type: MessageType,
        inner_payload: serde_json::Value,
        order_id: &str,
    ) -> usize {
        let bundle = RelayBundle {
            original_sender_id: origin.node_id.clone(),
            origin_address: origin.clone(),
            inner_type,
            inner_payload,
            order_id: order_id.to_string(),
            ttl: self.relay_ttl,
            hop_path: vec![self.address.node_id.clone()],
        };
        self.flood(&bundle).await
    }

    /// Re-inject a stored bundle as-is, preserving its originator,
    /// remaining TTL, and hop path.
    pub async fn resubmit(&self, bundle: &RelayBundle) -> usize {
        self.flood(bundle).await
    }

    /// Send `bundle` to every live neighbor not already in its hop path.
    async fn flood(&self, bundle: &RelayBundle) -> usize {
        if bundle.ttl == 0 {
            tracing::debug!(order_id = %bundle.order_id, "relay ttl exhausted");
            return 0;
        }
        let payload = match proto::to_payload(bundle) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, order_id = %bundle.order_id, "failed to encode bundle");
                return 0;
            }
        };
        let neighbors = self.neighbors.snapshot();
        let eligible = neighbors
            .iter()
            .filter(|(node_id, _)| !bundle.has_traversed(node_id));

        let mut successes = 0usize;
        for (node_id, address) in eligible {
            let envelope = Envelope::new(
                MessageType::MeshRelay,
                self.address.clone(),
                Some(address.clone()),
                payload.clone(),
            );
            if self.transport.send(&envelope, address.socket_addr()).await {
                successes += 1;
            } else {
                tracing::warn!(neighbor = %node_id, order_id = %bundle.order_id, "relay send failed");
            }
        }
        if successes == 0 {
            tracing::warn!(
                order_id = %bundle.order_id,
                neighbors = neighbors.len(),
                "could not relay bundle to any neighbor"
            );
        } else {
            tracing::debug!(
                order_id = %bundle.order_id,
                reached = successes,
                neighbors = neighbors.len(),
                "relayed bundle"
            );
        }
        successes
    }

    /// Handle one inbound `mesh_relay` envelope: dedup, deliver locally,
    /// re-flood.
    #[instrument(skip_all, fields(node = %self.address.node_id))]
    pub async fn process<H: DeliveryHooks + ?Sized>(&self, envelope: &Envelope, hooks: &H) {
        let bundle: RelayBundle = match proto::from_payload(&envelope.payload) {
            Ok(bundle) => bundle,
            Err(error) => {
                tracing::debug!(%error, "dropping undecodable relay payload");
                return;
            }
        };

        let order_key = self.dedup_key(&bundle);
        let response_for_us = bundle.inner_type == MessageType::TransferResponse
            && bundle.original_sender_id == self.address.node_id;

        if self.seen_order_ids.contains(&order_key) {
            // A duplicate, except that responses addressed to us must
            // still reach the quorum collector: the same transfer
            // legitimately attracts multiple signed responses, and losing
            // one here caps the client below quorum.
            if !response_for_us {
                tracing::debug!(order_id = %bundle.order_id, "duplicate relay, skipping");
                return;
            }
        } else {
            self.seen_order_ids.insert(order_key.clone());
        }

        self.deliver(&bundle, hooks).await;

        if bundle.ttl > 1 {
            let next = bundle.next_hop(&self.address.node_id);
            let forwarded = self.flood(&next).await;
            if forwarded == 0 && next.inner_type == MessageType::TransferRequest {
                hooks.on_relay_stalled(next).await;
            }
        } else {
            tracing::debug!(order_id = %bundle.order_id, "relay ttl expired");
        }
    }

    /// Route a bundle to the local role if it is addressed here.
    async fn deliver<H: DeliveryHooks + ?Sized>(&self, bundle: &RelayBundle, hooks: &H) {
        match bundle.inner_type {
            MessageType::TransferResponse => {
                if bundle.original_sender_id != self.address.node_id {
                    return;
                }
                match proto::from_payload::<TransferResponse>(&bundle.inner_payload) {
                    Ok(response) => hooks.on_transfer_response(response).await,
                    Err(error) => {
                        tracing::debug!(%error, "dropping undecodable transfer response")
                    }
                }
            }
            MessageType::TransferRequest => {
                if self.address.role != NodeRole::Authority {
                    return;
                }
                match proto::from_payload::<TransferRequest>(&bundle.inner_payload) {
                    Ok(request) => hooks.on_transfer_request(bundle, request).await,
                    Err(error) => {
                        tracing::debug!(%error, "dropping undecodable transfer request")
                    }
                }
            }
            MessageType::ConfirmationRequest => {
                match proto::from_payload::<ConfirmationRequest>(&bundle.inner_payload) {
                    Ok(request) => {
                        // Authorities settle every certificate; other
                        // nodes consume only certificates paying them.
                        let recipient = &request.confirmation_order.transfer_order.recipient;
                        if self.address.role == NodeRole::Authority
                            || *recipient == self.address.node_id
                        {
                            hooks.on_confirmation_request(request).await;
                        }
                    }
                    Err(error) => {
                        tracing::debug!(%error, "dropping undecodable confirmation request")
                    }
                }
            }
            other => {
                tracing::debug!(inner_type = %other, "ignoring non-relayable inner type");
            }
        }
    }

    /// Send a direct (non-relayed) envelope to a known peer.
    pub async fn send_direct(
        &self,
        message_type: MessageType,
        payload: serde_json::Value,
        recipient: &Address,
    ) -> bool {
        let envelope = Envelope::new(
            message_type,
            self.address.clone(),
            Some(recipient.clone()),
            payload,
        );
        self.transport
            .send(&envelope, recipient.socket_addr())
            .await
    }
}
