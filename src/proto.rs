//! Wire protocol: message envelopes, typed payloads, and the JSON codec.
//!
//! Every on-wire message is one UTF-8 JSON [`Envelope`] per datagram,
//! discriminated by [`MessageType`]. Payloads are carried as raw JSON and
//! decoded on demand with [`from_payload`], so a node can forward bundle
//! types it does not itself consume. The codec is strictly round-trippable
//! (`decode(encode(m)) == m`); unknown discriminators fail with
//! [`DecodeError`], while unknown *fields* are ignored for forward
//! compatibility.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use uuid::Uuid;

use crate::crypto::Signature;
use crate::timestamp::Timestamp;
use crate::types::{
    Address, ConfirmationOrder, NetworkMetrics, NodeId, RejectReason, TransferOrder,
};

/// Discriminator for every message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TransferRequest,
    TransferResponse,
    ConfirmationRequest,
    ConfirmationResponse,
    SyncRequest,
    SyncResponse,
    PeerDiscovery,
    Heartbeat,
    MeshRelay,
    Error,
}

impl Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde snake_case tag.
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json.trim_matches('"'))
    }
}

/// Top-level framing shared by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub message_type: MessageType,
    pub sender: Address,
    pub recipient: Option<Address>,
    pub timestamp: Timestamp,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub signature: Option<String>,
}

impl Envelope {
    pub fn new(
        message_type: MessageType,
        sender: Address,
        recipient: Option<Address>,
        payload: serde_json::Value,
    ) -> Self {
        Envelope {
            message_id: Uuid::new_v4(),
            message_type,
            sender,
            recipient,
            timestamp: Timestamp::now(),
            payload,
            signature: None,
        }
    }
}

/// Malformed or unknown wire data. Dropped silently at the receive path;
/// the sender is never notified.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("malformed wire message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datagram is not valid utf-8")]
    Encoding(#[from] std::str::Utf8Error),
}

/// Serialize an envelope to its wire form.
pub fn encode(envelope: &Envelope) -> Result<String, DecodeError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse one datagram into an envelope.
pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(raw)?;
    Ok(serde_json::from_str(text)?)
}

/// Convert a typed payload into the envelope's raw JSON slot.
pub fn to_payload<T: Serialize>(payload: &T) -> Result<serde_json::Value, DecodeError> {
    Ok(serde_json::to_value(payload)?)
}

/// Decode an envelope payload into its typed form.
pub fn from_payload<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, DecodeError> {
    Ok(serde_json::from_value(payload.clone())?)
}

/// `TRANSFER_REQUEST` payload: the client's lock, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub transfer_order: TransferOrder,
}

/// `TRANSFER_RESPONSE` payload: one authority's vote on a lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResponse {
    pub transfer_order: TransferOrder,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RejectReason>,
    /// Identity the signature is attributed to.
    pub authority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_signature: Option<Signature>,
}

/// `CONFIRMATION_REQUEST` payload: a certificate ready for settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub confirmation_order: ConfirmationOrder,
}

/// `SYNC_REQUEST` payload: ask an authority for account snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub last_sync_time: Timestamp,
    pub account_addresses: Vec<String>,
}

/// One account's balances as reported in a `SYNC_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub address: String,
    pub sequence_number: u64,
    /// token_address -> spendable meshpay balance
    pub balances: std::collections::HashMap<String, f64>,
}

/// `SYNC_RESPONSE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub accounts: Vec<AccountSnapshot>,
    pub sync_time: Timestamp,
}

/// `PEER_DISCOVERY` payload, broadcast as a presence beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDiscovery {
    pub node_info: Address,
    pub service_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_metrics: Option<NetworkMetrics>,
}

/// `ERROR` payload for unexpected peer-visible failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
}

/// `MESH_RELAY` payload: the unit of forwarding in the mesh.
///
/// Wraps an inner message with the relay metadata intermediate nodes need
/// to forward it without end-to-end connectivity. `ttl` strictly decreases
/// along each hop; `hop_path` is append-only and duplicate-free, and a
/// receiver never forwards to a node already in it (split horizon).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayBundle {
    /// `node_id` of the originator; also the delivery target for
    /// `transfer_response` bundles.
    pub original_sender_id: NodeId,
    pub origin_address: Address,
    pub inner_type: MessageType,
    pub inner_payload: serde_json::Value,
    /// Transfer order id the bundle is about, used for deduplication.
    pub order_id: String,
    /// Remaining hops.
    pub ttl: u8,
    /// node_ids already traversed, in order.
    pub hop_path: Vec<NodeId>,
}

impl RelayBundle {
    /// The bundle to forward: one hop consumed, this node appended.
    pub fn next_hop(&self, node_id: &str) -> RelayBundle {
        let mut hop_path = self.hop_path.clone();
        hop_path.push(node_id.to_string());
        RelayBundle {
            ttl: self.ttl.saturating_sub(1),
            hop_path,
            ..self.clone()
        }
    }

    pub fn has_traversed(&self, node_id: &str) -> bool {
        self.hop_path.iter().any(|hop| hop == node_id)
    }
}
