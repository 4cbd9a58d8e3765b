//! Shared harness for end-to-end mesh scenarios.
//!
//! Builds an in-process network of MeshPay nodes over an in-memory hub
//! transport. The hub models a lossless datagram medium with an explicit
//! link matrix: a send succeeds only when the two sockets are linked, so
//! partitions and node crashes are expressed by editing links. Tests pump
//! queued datagrams to a fixpoint instead of running worker loops, which
//! keeps every scenario deterministic.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshpay::accounts::AccountStore;
use meshpay::authority::Authority;
use meshpay::client::Client;
use meshpay::committee::Committee;
use meshpay::crypto::KeyPair;
use meshpay::neighbors::NeighborTable;
use meshpay::proto::{self, Envelope, MessageType, RelayBundle};
use meshpay::relay::{DeliveryHooks, MeshEngine, PassiveHooks};
use meshpay::timestamp::Timestamp;
use meshpay::transport::Transport;
use meshpay::types::{Address, NodeRole, TokenBalance};

/// Token used by every scenario.
pub const XTZ: &str = "0xXTZ";

#[derive(Default)]
struct HubInner {
    queues: HashMap<SocketAddr, VecDeque<Envelope>>,
    links: HashSet<(SocketAddr, SocketAddr)>,
    history: Vec<Envelope>,
}

/// In-memory datagram medium shared by every node in a test network.
#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Hub::default())
    }

    fn link(&self, a: SocketAddr, b: SocketAddr) {
        let mut inner = self.inner.lock().unwrap();
        inner.links.insert((a, b));
        inner.links.insert((b, a));
    }

    fn unlink(&self, a: SocketAddr, b: SocketAddr) {
        let mut inner = self.inner.lock().unwrap();
        inner.links.remove(&(a, b));
        inner.links.remove(&(b, a));
    }

    fn pop(&self, addr: SocketAddr) -> Option<Envelope> {
        self.inner
            .lock()
            .unwrap()
            .queues
            .get_mut(&addr)
            .and_then(VecDeque::pop_front)
    }

    /// Every envelope that made it onto the medium, in send order.
    pub fn history(&self) -> Vec<Envelope> {
        self.inner.lock().unwrap().history.clone()
    }
}

/// Transport endpoint bound to one socket address on the hub.
pub struct HubTransport {
    hub: Arc<Hub>,
    addr: SocketAddr,
}

impl Transport for HubTransport {
    async fn send(&self, envelope: &Envelope, dst: SocketAddr) -> bool {
        let mut inner = self.hub.inner.lock().unwrap();
        if !inner.links.contains(&(self.addr, dst)) {
            return false;
        }
        inner.history.push(envelope.clone());
        inner.queues.entry(dst).or_default().push_back(envelope.clone());
        true
    }

    async fn recv(&self, _timeout: Duration) -> Option<Envelope> {
        self.hub.pop(self.addr)
    }

    async fn close(&self) {}
}

enum NodeKind {
    Client(Arc<Client<HubTransport, KeyPair>>),
    Authority(Arc<Authority<HubTransport, KeyPair>>),
    Relay(PassiveHooks),
}

pub struct TestNode {
    pub address: Address,
    pub engine: Arc<MeshEngine<HubTransport>>,
    kind: NodeKind,
}

impl TestNode {
    fn hooks(&self) -> &dyn DeliveryHooks {
        match &self.kind {
            NodeKind::Client(client) => client.as_ref(),
            NodeKind::Authority(authority) => authority.as_ref(),
            NodeKind::Relay(hooks) => hooks,
        }
    }
}

/// Declarative builder for a test network.
pub struct NetBuilder {
    authorities: Vec<String>,
    clients: Vec<String>,
    relays: Vec<String>,
    funding: Vec<(String, f64)>,
    relay_ttl: u8,
}

impl NetBuilder {
    pub fn new() -> Self {
        NetBuilder {
            authorities: Vec::new(),
            clients: Vec::new(),
            relays: Vec::new(),
            funding: Vec::new(),
            relay_ttl: 8,
        }
    }

    pub fn authorities(mut self, names: &[&str]) -> Self {
        self.authorities = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn clients(mut self, names: &[&str]) -> Self {
        self.clients = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn relays(mut self, names: &[&str]) -> Self {
        self.relays = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Open an account at every authority with the given balance.
    pub fn fund(mut self, account: &str, amount: f64) -> Self {
        self.funding.push((account.to_string(), amount));
        self
    }

    pub fn relay_ttl(mut self, ttl: u8) -> Self {
        self.relay_ttl = ttl;
        self
    }

    pub fn build(self) -> TestNet {
        let hub = Hub::new();
        let mut nodes = BTreeMap::new();
        // Authorities sit in the vote/certificate port band, everyone
        // else in the payment-data band.
        let mut next_payment_port = 9001u16;

        let committee_addresses: Vec<Address> = self
            .authorities
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Address::new(
                    name.clone(),
                    IpAddr::V4(Ipv4Addr::LOCALHOST),
                    8001 + i as u16,
                    NodeRole::Authority,
                )
            })
            .collect();
        let committee = Committee::new(committee_addresses.clone());

        let make_engine = |address: &Address, hub: &Arc<Hub>| {
            let transport = Arc::new(HubTransport {
                hub: Arc::clone(hub),
                addr: address.socket_addr(),
            });
            Arc::new(MeshEngine::new(
                address.clone(),
                transport,
                NeighborTable::new(15.0),
                self.relay_ttl,
            ))
        };

        for address in committee_addresses {
            let engine = make_engine(&address, &hub);
            let accounts = AccountStore::new();
            for (account, amount) in &self.funding {
                accounts.fund(account, &TokenBalance::new("XTZ", XTZ, *amount), Timestamp::now());
            }
            let authority = Authority::new(
                address.node_id.clone(),
                Arc::clone(&engine),
                accounts,
                committee.clone(),
                KeyPair(format!("secret-{}", address.node_id)),
            );
            nodes.insert(
                address.node_id.clone(),
                TestNode {
                    address,
                    engine,
                    kind: NodeKind::Authority(Arc::new(authority)),
                },
            );
        }

        for name in &self.clients {
            let port = next_payment_port;
            next_payment_port += 1;
            let address = Address::new(
                name.clone(),
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                NodeRole::Client,
            );
            let engine = make_engine(&address, &hub);
            let client = Client::new(
                Arc::clone(&engine),
                committee.clone(),
                KeyPair(format!("secret-{name}")),
                5.0,
                120.0,
            );
            nodes.insert(
                name.clone(),
                TestNode {
                    address,
                    engine,
                    kind: NodeKind::Client(Arc::new(client)),
                },
            );
        }

        for name in &self.relays {
            let port = next_payment_port;
            next_payment_port += 1;
            let address = Address::new(
                name.clone(),
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                NodeRole::Gateway,
            );
            let engine = make_engine(&address, &hub);
            nodes.insert(
                name.clone(),
                TestNode {
                    address,
                    engine,
                    kind: NodeKind::Relay(PassiveHooks),
                },
            );
        }

        TestNet { hub, nodes }
    }
}

/// A fully wired in-process mesh.
pub struct TestNet {
    pub hub: Arc<Hub>,
    nodes: BTreeMap<String, TestNode>,
}

impl TestNet {
    fn node(&self, name: &str) -> &TestNode {
        self.nodes
            .get(name)
            .unwrap_or_else(|| panic!("unknown node {name}"))
    }

    pub fn client(&self, name: &str) -> &Arc<Client<HubTransport, KeyPair>> {
        match &self.node(name).kind {
            NodeKind::Client(client) => client,
            _ => panic!("{name} is not a client"),
        }
    }

    pub fn authority(&self, name: &str) -> &Arc<Authority<HubTransport, KeyPair>> {
        match &self.node(name).kind {
            NodeKind::Authority(authority) => authority,
            _ => panic!("{name} is not an authority"),
        }
    }

    /// Make two nodes mutual 1-hop neighbors.
    pub fn connect(&self, a: &str, b: &str) {
        let node_a = self.node(a);
        let node_b = self.node(b);
        self.hub
            .link(node_a.address.socket_addr(), node_b.address.socket_addr());
        node_a
            .engine
            .neighbors()
            .insert(b.to_string(), node_b.address.clone());
        node_b
            .engine
            .neighbors()
            .insert(a.to_string(), node_a.address.clone());
    }

    /// Pairwise-connect a set of nodes (a full 1-hop clique).
    pub fn connect_all(&self, names: &[&str]) {
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                self.connect(a, b);
            }
        }
    }

    /// Sever the link and forget each other as neighbors.
    pub fn disconnect(&self, a: &str, b: &str) {
        let node_a = self.node(a);
        let node_b = self.node(b);
        self.hub
            .unlink(node_a.address.socket_addr(), node_b.address.socket_addr());
        node_a.engine.neighbors().remove(b);
        node_b.engine.neighbors().remove(a);
    }

    /// Isolate a node completely, as if it crashed.
    pub fn crash(&self, name: &str) {
        let peers: Vec<String> = self
            .nodes
            .keys()
            .filter(|other| *other != name)
            .cloned()
            .collect();
        for peer in peers {
            self.disconnect(name, &peer);
        }
    }

    /// Deliver queued datagrams until the network is quiet.
    pub async fn pump(&self) {
        loop {
            let mut progressed = false;
            for node in self.nodes.values() {
                while let Some(envelope) = self.hub.pop(node.address.socket_addr()) {
                    progressed = true;
                    match envelope.message_type {
                        MessageType::MeshRelay => {
                            node.engine.process(&envelope, node.hooks()).await;
                        }
                        MessageType::Heartbeat => {
                            node.engine.neighbors().touch(&envelope.sender.node_id);
                        }
                        _ => node.hooks().on_direct(&envelope).await,
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// One buffered-retry pass on a client followed by a pump.
    pub async fn retry_cycle(&self, client_name: &str) {
        self.client(client_name).retry_tick(Timestamp::now()).await;
        self.pump().await;
    }

    /// Every relay bundle that crossed the medium.
    pub fn relay_bundles(&self) -> Vec<RelayBundle> {
        self.hub
            .history()
            .iter()
            .filter(|envelope| envelope.message_type == MessageType::MeshRelay)
            .filter_map(|envelope| proto::from_payload(&envelope.payload).ok())
            .collect()
    }
}
