//! MeshPay node daemon.
//!
//! Boots one mesh node in the role named by its config file: an authority
//! (vote on transfer orders, settle certificates), a client (initiate
//! transfers, collect quorums), or a gateway (pure relay). All roles run
//! the same mesh engine, discovery loops, and UDP transport.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` selects the JSON config file
//! - `RUST_LOG` controls tracing verbosity

use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;

use meshpay::accounts::AccountStore;
use meshpay::authority::Authority;
use meshpay::client::Client;
use meshpay::committee::Committee;
use meshpay::config::Config;
use meshpay::crypto::KeyPair;
use meshpay::discovery::{Discovery, PingProbe};
use meshpay::neighbors::NeighborTable;
use meshpay::node::{self, NodeHandle};
use meshpay::relay::{MeshEngine, PassiveHooks};
use meshpay::shutdown::ShutdownSignal;
use meshpay::telemetry::Telemetry;
use meshpay::timestamp::Timestamp;
use meshpay::transport::{Transport, UdpTransport};
use meshpay::types::{NodeRole, TokenBalance};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    Telemetry::init();

    let config = Config::load()?;
    let address = config.address();
    let mesh = config.mesh().clone();

    let bind_addr = SocketAddr::new(config.host(), config.port());
    let transport = Arc::new(UdpTransport::bind(bind_addr).await.inspect_err(|error| {
        tracing::error!(%bind_addr, %error, "failed to bind node transport");
    })?);
    tracing::info!(node = %address, "transport bound");

    let neighbors = NeighborTable::new(mesh.neighbor_timeout);
    let engine = Arc::new(MeshEngine::new(
        address.clone(),
        Arc::clone(&transport),
        neighbors.clone(),
        mesh.relay_ttl,
    ));
    node::bootstrap_committee_neighbors(&engine, config.committee());

    let committee = Committee::new(config.committee().to_vec());
    let signer = KeyPair(config.secret());

    let capabilities = match config.role() {
        NodeRole::Authority => vec!["relay".to_string(), "authority".to_string()],
        NodeRole::Client => vec!["relay".to_string(), "client".to_string()],
        NodeRole::Gateway => vec!["relay".to_string()],
    };
    let discovery = Arc::new(Discovery::new(
        address.clone(),
        capabilities,
        neighbors,
        mesh.discovery_port,
        mesh.discovery_interval,
    ));

    let handle: NodeHandle = match config.role() {
        NodeRole::Authority => {
            let accounts = AccountStore::new();
            let now = Timestamp::now();
            for funding in config.funding() {
                accounts.fund(
                    &funding.account,
                    &TokenBalance::new(
                        funding.token_symbol.clone(),
                        funding.token_address.clone(),
                        funding.amount,
                    ),
                    now,
                );
            }
            let authority = Arc::new(Authority::new(
                config.node_id().to_string(),
                engine,
                accounts,
                committee,
                signer,
            ));
            node::start_authority(authority, discovery, PingProbe)
        }
        NodeRole::Client => {
            let client = Arc::new(Client::new(
                engine,
                committee,
                signer,
                mesh.retry_interval,
                mesh.relay_bundle_max_age,
            ));
            node::start_client(client, discovery, PingProbe)
        }
        NodeRole::Gateway => {
            node::start_gateway(engine, Arc::new(PassiveHooks), discovery, PingProbe)
        }
    };

    let shutdown = ShutdownSignal::install()?;
    shutdown.recv().await;
    tracing::info!("shutdown signal received, draining workers");
    handle.shutdown().await;
    transport.close().await;

    Ok(())
}
