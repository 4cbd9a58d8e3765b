//! Neighbor discovery: UDP broadcast beacons plus reachability probing.
//!
//! Two cooperative loops maintain the node's routing view. The beacon loop
//! broadcasts a `peer_discovery` envelope every `discovery_interval`
//! seconds, pruning stale neighbors first. The listen loop binds the
//! shared discovery port and, for every beacon heard, *probes* the sender
//! with one ICMP echo before trusting it; beacon receipt alone proves
//! nothing, because unidirectional wireless links are common.
//!
//! A bind failure kills discovery but never the node: the relay engine
//! keeps operating on neighbors seeded by committee bootstrap.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::neighbors::NeighborTable;
use crate::proto::{self, Envelope, MessageType, PeerDiscovery};
use crate::timestamp::Timestamp;
use crate::transport::MAX_DATAGRAM_SIZE;
use crate::types::Address;

/// Confirms that a peer is actually reachable over the local link.
pub trait ReachabilityProbe: Send + Sync + 'static {
    fn is_reachable(&self, ip: IpAddr) -> impl Future<Output = bool> + Send;
}

/// One ICMP echo with a one-second deadline, via the system `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProbe;

impl ReachabilityProbe for PingProbe {
    async fn is_reachable(&self, ip: IpAddr) -> bool {
        let ping = Command::new("ping")
            .args(["-c", "1", "-W", "1"])
            .arg(ip.to_string())
            .output();
        match tokio::time::timeout(Duration::from_secs(3), ping).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(error)) => {
                tracing::debug!(%ip, %error, "reachability probe failed to run");
                false
            }
            Err(_) => false,
        }
    }
}

/// The discovery subsystem of one node.
pub struct Discovery {
    address: Address,
    capabilities: Vec<String>,
    neighbors: NeighborTable,
    discovery_port: u16,
    interval: Duration,
}

impl Discovery {
    pub fn new(
        address: Address,
        capabilities: Vec<String>,
        neighbors: NeighborTable,
        discovery_port: u16,
        interval_seconds: f64,
    ) -> Self {
        Discovery {
            address,
            capabilities,
            neighbors,
            discovery_port,
            interval: Duration::from_secs_f64(interval_seconds),
        }
    }

    fn beacon(&self) -> Result<Envelope, proto::DecodeError> {
        let payload = proto::to_payload(&PeerDiscovery {
            node_info: self.address.clone(),
            service_capabilities: self.capabilities.clone(),
            network_metrics: None,
        })?;
        Ok(Envelope::new(
            MessageType::PeerDiscovery,
            self.address.clone(),
            None,
            payload,
        ))
    }

    /// Periodically announce our presence on the broadcast domain.
    #[instrument(skip_all, fields(node = %self.address.node_id))]
    pub async fn run_beacon_loop(&self, cancel: CancellationToken) {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => socket,
            Err(error) => {
                tracing::error!(%error, "failed to open beacon socket; discovery broadcast disabled");
                return;
            }
        };
        if let Err(error) = socket.set_broadcast(true) {
            tracing::error!(%error, "failed to enable broadcast; discovery broadcast disabled");
            return;
        }
        let broadcast = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.discovery_port);

        loop {
            // Stale peers drop out of the table even when no beacons at
            // all are arriving.
            self.neighbors.snapshot();

            match self.beacon().and_then(|envelope| proto::encode(&envelope)) {
                Ok(wire) => {
                    if let Err(error) = socket.send_to(wire.as_bytes(), broadcast).await {
                        tracing::debug!(%error, "beacon broadcast failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to encode beacon");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Listen for peer beacons and fold them into the neighbor table.
    #[instrument(skip_all, fields(node = %self.address.node_id))]
    pub async fn run_listen_loop<P: ReachabilityProbe>(&self, probe: P, cancel: CancellationToken) {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.discovery_port)).await {
            Ok(socket) => socket,
            Err(error) => {
                // Fatal for discovery only; relaying continues on
                // committee-bootstrapped neighbors.
                tracing::error!(
                    %error,
                    port = self.discovery_port,
                    "failed to bind discovery port; passive discovery disabled"
                );
                return;
            }
        };

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };
            let (len, from) = match received {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::debug!(%error, "discovery receive error");
                    continue;
                }
            };
            let envelope = match proto::decode(&buf[..len]) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::debug!(%from, %error, "dropping undecodable beacon");
                    continue;
                }
            };
            if envelope.message_type != MessageType::PeerDiscovery {
                continue;
            }
            let beacon: PeerDiscovery = match proto::from_payload(&envelope.payload) {
                Ok(beacon) => beacon,
                Err(error) => {
                    tracing::debug!(%from, %error, "dropping malformed beacon payload");
                    continue;
                }
            };
            self.observe_beacon(beacon.node_info, &probe).await;
        }
    }

    /// Fold one heard beacon into the neighbor table, probing first.
    pub async fn observe_beacon<P: ReachabilityProbe>(&self, peer: Address, probe: &P) {
        if peer.node_id == self.address.node_id {
            return;
        }
        let known = self.neighbors.contains(&peer.node_id);
        let reachable = probe.is_reachable(peer.ip).await;
        match (reachable, known) {
            (true, false) => {
                tracing::info!(neighbor = %peer.node_id, ip = %peer.ip, "discovered neighbor");
                self.neighbors.insert_at(peer.node_id.clone(), peer, Timestamp::now());
            }
            (true, true) => {
                self.neighbors.touch_at(&peer.node_id, Timestamp::now());
            }
            (false, true) => {
                tracing::info!(neighbor = %peer.node_id, "neighbor unreachable, evicting");
                self.neighbors.remove(&peer.node_id);
            }
            (false, false) => {
                tracing::debug!(neighbor = %peer.node_id, "ignoring unreachable beacon");
            }
        }
    }
}
