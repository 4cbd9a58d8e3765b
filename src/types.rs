//! Domain types for the MeshPay settlement protocol.
//!
//! The key objects are [`TransferOrder`] (the client's signed spend intent,
//! a.k.a. the *lock*), [`ConfirmationOrder`] (a quorum of authority votes
//! over a lock), and [`Address`] (stable node identity plus transport
//! locator). Everything here is plain data: the relay engine, the authority
//! decision procedure, and the client quorum collector all operate on these
//! types but live in their own modules.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use uuid::Uuid;

use crate::crypto::Signature;
use crate::timestamp::Timestamp;

/// Stable node identifier. Deduplication and hop-path checks key on this,
/// never on the transport locator.
pub type NodeId = String;

/// Name an authority is known by across the committee.
pub type AuthorityName = String;

/// Role a node plays in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Authority,
    Client,
    Gateway,
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            NodeRole::Authority => "authority",
            NodeRole::Client => "client",
            NodeRole::Gateway => "gateway",
        };
        write!(f, "{}", tag)
    }
}

impl FromStr for NodeRole {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authority" => Ok(NodeRole::Authority),
            "client" => Ok(NodeRole::Client),
            "gateway" => Ok(NodeRole::Gateway),
            other => Err(AddressParseError::UnknownRole(other.to_string())),
        }
    }
}

/// Network address of a node: identity plus transport locator.
///
/// The `(ip, port)` pair may change (mobility, re-association) without
/// changing `node_id`; protocol state never keys on the locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub node_id: NodeId,
    pub ip: IpAddr,
    pub port: u16,
    pub role: NodeRole,
}

impl Address {
    pub fn new(node_id: impl Into<NodeId>, ip: IpAddr, port: u16, role: NodeRole) -> Self {
        Address {
            node_id: node_id.into(),
            ip,
            port,
            role,
        }
    }

    /// Transport locator for point-to-point unicast.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}:{}", self.role, self.node_id, self.ip, self.port)
    }
}

/// Error parsing the textual `role:node_id@ip:port` address form.
#[derive(thiserror::Error, Debug)]
pub enum AddressParseError {
    #[error("malformed address: {0}")]
    Malformed(String),
    #[error("unknown node role: {0}")]
    UnknownRole(String),
    #[error("invalid ip address: {0}")]
    InvalidIp(#[from] std::net::AddrParseError),
    #[error("invalid port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^([a-z]+):([A-Za-z0-9_.-]+)@(.+):(\d{1,5})$")
                .expect("invalid address regex")
        });
        let captures = ADDRESS_REGEX
            .captures(s)
            .ok_or_else(|| AddressParseError::Malformed(s.to_string()))?;
        Ok(Address {
            role: captures[1].parse()?,
            node_id: captures[2].to_string(),
            ip: captures[3].parse()?,
            port: captures[4].parse()?,
        })
    }
}

/// Lifecycle of a transfer as tracked by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    /// Awaiting quorum; the retry loop keeps re-injecting the order.
    Buffered,
    Confirmed,
    Rejected,
    Finalized,
}

impl TransactionStatus {
    /// Terminal states are never re-entered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Finalized | TransactionStatus::Rejected)
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Buffered => "buffered",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Finalized => "finalized",
        };
        write!(f, "{}", tag)
    }
}

/// Reasons an authority refuses to vote for a transfer order.
///
/// These travel inside a negative `TransferResponse`; they are protocol
/// values, not process-local errors, so the client can count identical
/// rejections toward a rejection quorum.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The order's sequence number does not match the account's.
    #[error("sequence mismatch")]
    SequenceMismatch,
    /// The account already voted for a different order at this sequence.
    #[error("conflicting lock")]
    ConflictingLock,
    /// The lock's validity window elapsed before the order arrived.
    #[error("lock expired")]
    LockExpired,
    /// The sender's spendable balance does not cover the amount.
    #[error("insufficient funds")]
    InsufficientFunds,
}

/// Transfer order from client to the committee.
///
/// Doubles as the *lock*: the client's signed spend intent at a given
/// sequence number. Replay protection comes from the monotonic
/// `sequence_number`; `ttl_seconds` bounds how long the lock stays valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOrder {
    pub order_id: Uuid,
    pub sender: NodeId,
    pub recipient: NodeId,
    pub token_address: String,
    pub amount: u64,
    pub sequence_number: u64,
    pub timestamp: Timestamp,
    pub signature: Option<Signature>,
    /// Committee epoch the order was issued under.
    #[serde(default)]
    pub epoch: u32,
    /// Seconds until the lock expires.
    #[serde(default = "default_lock_ttl")]
    pub ttl_seconds: f64,
}

fn default_lock_ttl() -> f64 {
    30.0
}

impl TransferOrder {
    /// Whether the lock validity window has elapsed as of `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.elapsed_since(self.timestamp) > self.ttl_seconds
    }
}

/// A single authority's signed acceptance of a transfer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransferOrder {
    pub order_id: Uuid,
    pub transfer_order: TransferOrder,
    pub authority_signature: HashMap<AuthorityName, Signature>,
    pub timestamp: Timestamp,
}

/// Certificate carrying a quorum of authority signatures over one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationOrder {
    pub order_id: Uuid,
    pub transfer_order: TransferOrder,
    /// Signatures in arrival order, one per distinct authority.
    pub authority_signatures: Vec<Signature>,
    pub timestamp: Timestamp,
    pub status: TransactionStatus,
}

/// Per-token balance view of an account.
///
/// Only `meshpay_balance` is authoritative for settlement; the wallet and
/// total figures mirror on-chain state owned by external reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub token_symbol: String,
    pub token_address: String,
    pub wallet_balance: f64,
    pub meshpay_balance: f64,
    pub total_balance: f64,
    pub decimals: u8,
}

impl TokenBalance {
    pub fn new(symbol: impl Into<String>, address: impl Into<String>, meshpay_balance: f64) -> Self {
        TokenBalance {
            token_symbol: symbol.into(),
            token_address: address.into(),
            wallet_balance: 0.0,
            meshpay_balance,
            total_balance: meshpay_balance,
            decimals: 18,
        }
    }
}

/// Link-quality metrics optionally advertised in discovery beacons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub latency: f64,
    pub bandwidth: f64,
    pub packet_loss: f64,
    pub connectivity_ratio: f64,
    pub last_update: Timestamp,
}

/// Live-peer entry in the neighbor table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: Address,
    pub last_seen: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_count: Option<u32>,
}

impl PeerInfo {
    pub fn new(address: Address, last_seen: Timestamp) -> Self {
        PeerInfo {
            address,
            last_seen,
            rssi: None,
            hop_count: None,
        }
    }
}
