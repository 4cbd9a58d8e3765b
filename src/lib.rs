//! Offline-capable payment settlement over an opportunistic wireless mesh.
//!
//! MeshPay moves FastPay-style settlement onto a partition-prone multi-hop
//! network: clients relay signed transfer orders through whatever neighbors
//! happen to be reachable, a committee of authorities votes on them, and the
//! signed votes flood back until the client holds more than two thirds of
//! the committee and can emit a confirmation certificate.
//!
//! # Architecture
//!
//! Every node, client or authority, embeds the same [`relay::MeshEngine`].
//! The engine owns the neighbor table and the per-order dedup set and
//! presents three ports: `submit` (inject a bundle), `process` (handle an
//! inbound relay, invoking the role's [`relay::DeliveryHooks`]), and
//! `neighbors` (read-only view of live peers). Role logic layers on top:
//!
//! - [`client`] — transfer initiation, quorum collection, buffered retry,
//!   confirmation emission, store-carry-forward of stalled bundles.
//! - [`authority`] — FastPay acceptance over [`accounts`], vote signing,
//!   idempotent settlement of quorum certificates.
//!
//! # Modules
//!
//! - [`proto`] — wire envelopes, relay bundles, and the JSON codec.
//! - [`transport`] — datagram transport seam plus the UDP implementation.
//! - [`neighbors`] — live-peer table with stale eviction.
//! - [`discovery`] — broadcast beacons and reachability probing.
//! - [`relay`] — TTL-bounded controlled flooding with deduplication.
//! - [`committee`] — committee roster and the `2f+1` quorum rule.
//! - [`crypto`] — opaque signing seam.
//! - [`node`] — worker assembly and graceful shutdown.
//! - [`config`] — node configuration loaded from JSON.

pub mod accounts;
pub mod authority;
pub mod client;
pub mod committee;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod neighbors;
pub mod node;
pub mod proto;
pub mod relay;
pub mod shutdown;
pub mod stats;
pub mod telemetry;
pub mod timestamp;
pub mod transport;
pub mod types;
