#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! The gossip transport adapter: topic join, publish, receive, and peer
//! discovery, built on `libp2p` gossipsub + mDNS.
//!
//! A `SwarmCommand` channel carries outbound intent into a dedicated task
//! that owns the `Swarm`, and observations received over the topic are
//! forwarded back out over a channel of their own — nothing outside this
//! module ever touches the `Swarm` directly. Peer discovery is local-network
//! only, via mDNS's own periodic query rather than a wide-area DHT; the
//! query cadence is the one externally configurable knob into that process.

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub, identity::Keypair, mdns, noise, swarm::NetworkBehaviour, swarm::SwarmEvent, tcp,
    yamux, Multiaddr, PeerId, Swarm, Transport as _,
};
use oracle_types::Observation;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transport setup failed: {0}")]
    Setup(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("transport has shut down")]
    Closed,
}

/// The narrow contract the core aggregation logic depends on, grounded on
/// `PubSubService.Publish`/`Receive`/`GetNodeID`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serializes and publishes `observation` to the shared topic.
    async fn publish(&self, observation: &Observation) -> Result<(), NetworkError>;

    /// Awaits the next delivery. Returns `None` only when the transport has
    /// shut down; deliveries that originate at self are filtered out before
    /// this resolves, so every `Some` is a foreign observation.
    async fn receive(&self) -> Option<Observation>;

    fn node_id(&self) -> String;
}

#[derive(NetworkBehaviour)]
struct GossipBehaviour {
    gossipsub: gossipsub::Behaviour,
    mdns: mdns::tokio::Behaviour,
}

enum SwarmCommand {
    Publish(Vec<u8>, oneshot::Sender<Result<(), NetworkError>>),
}

/// A libp2p gossipsub-backed [`Transport`].
pub struct Libp2pTransport {
    local_peer_id: PeerId,
    command_tx: mpsc::Sender<SwarmCommand>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<Observation>>,
    _driver: tokio::task::JoinHandle<()>,
}

impl Libp2pTransport {
    /// Joins `topic_name` and starts listening on `port`. Spawns the swarm
    /// driver task, which owns the `Swarm` for the lifetime of the process
    /// (or until `shutdown` is cancelled). `discover_peers_interval` sets how
    /// often mDNS re-queries the local network for peers.
    pub async fn join(
        topic_name: &str,
        port: u16,
        keypair: Keypair,
        discover_peers_interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, NetworkError> {
        let local_peer_id = keypair.public().to_peer_id();

        let mut swarm = Swarm::new(
            libp2p::tcp::tokio::Transport::new(tcp::Config::default())
                .upgrade(libp2p::core::upgrade::Version::V1Lazy)
                .authenticate(noise::Config::new(&keypair).map_err(|e| NetworkError::Setup(e.to_string()))?)
                .multiplex(yamux::Config::default())
                .boxed(),
            build_behaviour(&keypair, topic_name, discover_peers_interval)?,
            local_peer_id,
            libp2p::swarm::Config::with_tokio_executor(),
        );

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{port}")
            .parse()
            .map_err(|e: libp2p::multiaddr::Error| NetworkError::Setup(e.to_string()))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| NetworkError::Setup(e.to_string()))?;

        let topic = gossipsub::IdentTopic::new(topic_name);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Setup(e.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);

        let driver = tokio::spawn(drive_swarm(
            swarm,
            topic,
            local_peer_id,
            command_rx,
            event_tx,
            shutdown,
        ));

        Ok(Self {
            local_peer_id,
            command_tx,
            event_rx: tokio::sync::Mutex::new(event_rx),
            _driver: driver,
        })
    }
}

fn build_behaviour(
    keypair: &Keypair,
    _topic_name: &str,
    discover_peers_interval: Duration,
) -> Result<GossipBehaviour, NetworkError> {
    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(1))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .message_id_fn(|message: &gossipsub::Message| {
            gossipsub::MessageId::from(blake_like_id(&message.data))
        })
        .build()
        .map_err(|e| NetworkError::Setup(e.to_string()))?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )
    .map_err(|e| NetworkError::Setup(e.to_string()))?;

    let mdns_config = mdns::Config {
        query_interval: discover_peers_interval,
        ..Default::default()
    };
    let mdns = mdns::tokio::Behaviour::new(mdns_config, keypair.public().to_peer_id())
        .map_err(|e| NetworkError::Setup(e.to_string()))?;

    Ok(GossipBehaviour { gossipsub, mdns })
}

/// A cheap, non-cryptographic content id used only for gossipsub's local
/// duplicate-suppression cache — never a protocol-level identifier.
fn blake_like_id(data: &[u8]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish().to_string()
}

async fn drive_swarm(
    mut swarm: Swarm<GossipBehaviour>,
    topic: gossipsub::IdentTopic,
    local_peer_id: PeerId,
    mut command_rx: mpsc::Receiver<SwarmCommand>,
    event_tx: mpsc::Sender<Observation>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("transport driver shutting down");
                return;
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SwarmCommand::Publish(data, reply)) => {
                        let result = swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(topic.clone(), data)
                            .map(|_| ())
                            .map_err(|e| NetworkError::Publish(e.to_string()));
                        let _ = reply.send(result);
                    }
                    None => return,
                }
            }
            event = swarm.select_next_some() => {
                handle_swarm_event(&mut swarm, event, local_peer_id, &event_tx).await;
            }
        }
    }
}

async fn handle_swarm_event(
    swarm: &mut Swarm<GossipBehaviour>,
    event: SwarmEvent<GossipBehaviourEvent>,
    local_peer_id: PeerId,
    event_tx: &mpsc::Sender<Observation>,
) {
    match event {
        SwarmEvent::Behaviour(GossipBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
            for (peer_id, addr) in peers {
                tracing::debug!(%peer_id, %addr, "discovered peer via mdns");
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }
        }
        SwarmEvent::Behaviour(GossipBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
            for (peer_id, _addr) in peers {
                swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
            }
        }
        SwarmEvent::Behaviour(GossipBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        })) => {
            if propagation_source == local_peer_id {
                tracing::debug!("skipping message from self");
                return;
            }
            match serde_json::from_slice::<Observation>(&message.data) {
                Ok(observation) => {
                    if event_tx.send(observation).await.is_err() {
                        tracing::debug!("event receiver dropped, discarding delivery");
                    }
                }
                Err(e) => {
                    tracing::info!(error = %e, "dropping malformed gossip delivery");
                }
            }
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!(%address, "listening");
        }
        _ => {}
    }
}

#[async_trait]
impl Transport for Libp2pTransport {
    async fn publish(&self, observation: &Observation) -> Result<(), NetworkError> {
        let data = serde_json::to_vec(observation)
            .map_err(|e| NetworkError::Publish(e.to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SwarmCommand::Publish(data, reply_tx))
            .await
            .map_err(|_| NetworkError::Closed)?;
        reply_rx.await.map_err(|_| NetworkError::Closed)?
    }

    async fn receive(&self) -> Option<Observation> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    fn node_id(&self) -> String {
        self.local_peer_id.to_string()
    }
}
