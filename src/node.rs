//! Worker assembly: wiring the engine, role logic, and background loops.
//!
//! A node runs a small fixed set of workers, all selecting on one
//! cancellation token: the transport receive worker feeding the mesh
//! engine, the discovery beacon and listen workers, and (clients only) the
//! buffered-retry worker. Cancelling the token drains every worker within
//! one loop iteration plus one receive timeout.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::authority::Authority;
use crate::client::Client;
use crate::crypto::Signer;
use crate::discovery::{Discovery, ReachabilityProbe};
use crate::proto::MessageType;
use crate::relay::{DeliveryHooks, MeshEngine};
use crate::timestamp::Timestamp;
use crate::transport::{RECV_TIMEOUT, Transport};
use crate::types::Address;

/// Handle over a running node's workers.
pub struct NodeHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl NodeHandle {
    fn new() -> Self {
        NodeHandle {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every worker and wait for them to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Seed the neighbor table with the committee roster so relaying works
/// before discovery converges.
pub fn bootstrap_committee_neighbors<T: Transport>(engine: &MeshEngine<T>, committee: &[Address]) {
    for member in committee {
        if member.node_id != engine.node_id() {
            engine
                .neighbors()
                .insert(member.node_id.clone(), member.clone());
        }
    }
}

fn spawn_receive_worker<T, H>(
    handle: &NodeHandle,
    engine: Arc<MeshEngine<T>>,
    hooks: Arc<H>,
) where
    T: Transport,
    H: DeliveryHooks + 'static,
{
    let cancel = handle.cancel.clone();
    handle.tracker.spawn(async move {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = engine.transport().recv(RECV_TIMEOUT) => received,
            };
            let Some(envelope) = received else {
                continue;
            };
            match envelope.message_type {
                MessageType::MeshRelay => engine.process(&envelope, hooks.as_ref()).await,
                MessageType::Heartbeat => {
                    engine.neighbors().touch(&envelope.sender.node_id);
                }
                _ => hooks.on_direct(&envelope).await,
            }
        }
        tracing::debug!("receive worker drained");
    });
}

fn spawn_discovery_workers<P>(handle: &NodeHandle, discovery: Arc<Discovery>, probe: P)
where
    P: ReachabilityProbe,
{
    let beacon_cancel = handle.cancel.clone();
    let beacon_discovery = Arc::clone(&discovery);
    handle.tracker.spawn(async move {
        beacon_discovery.run_beacon_loop(beacon_cancel).await;
    });

    let listen_cancel = handle.cancel.clone();
    handle.tracker.spawn(async move {
        discovery.run_listen_loop(probe, listen_cancel).await;
    });
}

fn spawn_retry_worker<T, S>(handle: &NodeHandle, client: Arc<Client<T, S>>)
where
    T: Transport,
    S: Signer + 'static,
{
    let cancel = handle.cancel.clone();
    let interval = std::time::Duration::from_secs_f64(client.retry_interval());
    handle.tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            client.retry_tick(Timestamp::now()).await;
        }
        tracing::debug!("retry worker drained");
    });
}

/// Start all workers for an authority node.
pub fn start_authority<T, S, P>(
    authority: Arc<Authority<T, S>>,
    discovery: Arc<Discovery>,
    probe: P,
) -> NodeHandle
where
    T: Transport,
    S: Signer + 'static,
    P: ReachabilityProbe,
{
    let handle = NodeHandle::new();
    spawn_receive_worker(&handle, Arc::clone(authority.engine()), Arc::clone(&authority));
    spawn_discovery_workers(&handle, discovery, probe);
    handle.tracker.close();
    tracing::info!(authority = %authority.name(), "authority node started");
    handle
}

/// Start all workers for a client node.
pub fn start_client<T, S, P>(
    client: Arc<Client<T, S>>,
    discovery: Arc<Discovery>,
    probe: P,
) -> NodeHandle
where
    T: Transport,
    S: Signer + 'static,
    P: ReachabilityProbe,
{
    let handle = NodeHandle::new();
    spawn_receive_worker(&handle, Arc::clone(client.engine()), Arc::clone(&client));
    spawn_discovery_workers(&handle, discovery, probe);
    spawn_retry_worker(&handle, client);
    handle.tracker.close();
    tracing::info!("client node started");
    handle
}

/// Start all workers for a pure relay (gateway) node.
pub fn start_gateway<T, H, P>(
    engine: Arc<MeshEngine<T>>,
    hooks: Arc<H>,
    discovery: Arc<Discovery>,
    probe: P,
) -> NodeHandle
where
    T: Transport,
    H: DeliveryHooks + 'static,
    P: ReachabilityProbe,
{
    let handle = NodeHandle::new();
    spawn_receive_worker(&handle, engine, hooks);
    spawn_discovery_workers(&handle, discovery, probe);
    handle.tracker.close();
    tracing::info!("gateway node started");
    handle
}
