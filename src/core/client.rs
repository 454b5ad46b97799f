// src/core/client.rs

//! The client registry: owns every node handle and link, supervises node lifecycle
//! signals and exposes the event stream.

use crate::config::{ClientConfig, NodeConfig};
use crate::core::balancer::{LoadBalancer, SelectionContext};
use crate::core::errors::{LavalinkError, Result};
use crate::core::events::{ClientEvent, EventBus, EventHandler, EventStream, EventSubscription};
use crate::core::link::{Link, LinkState};
use crate::core::node::socket::{self, SocketIdentity};
use crate::core::node::{HttpTransport, NodeHandle, NodeSignal, NodeTransport};
use crate::core::pool::NodePool;
use crate::core::protocol::{GuildId, PlayerSnapshot, PlayerUpdate};
use crate::core::tasks::orphan_retry::{OrphanRetryTask, retry_orphaned_links};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The process-wide entry point. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct LavalinkClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    pool: Arc<NodePool>,
    links: DashMap<GuildId, Arc<Link>>,
    bus: EventBus,
    signal_tx: UnboundedSender<NodeSignal>,
    shutdown_tx: broadcast::Sender<()>,
    sockets: DashMap<String, JoinHandle<()>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LavalinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LavalinkClient")
            .field("user_id", &self.inner.config.user_id)
            .field("nodes", &self.inner.pool.len())
            .field("links", &self.inner.links.len())
            .finish()
    }
}

impl LavalinkClient {
    /// Creates a client without nodes. Must be called within a Tokio runtime.
    ///
    /// Nodes listed in `config.nodes` are not connected; use [`LavalinkClient::connect`]
    /// or add them one by one.
    pub fn new(config: ClientConfig) -> Self {
        let balancer = Arc::new(LoadBalancer::from_config(&config.balancer));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let orphan_retry_interval = config.link.orphan_retry_interval;

        let inner = Arc::new(ClientInner {
            pool: Arc::new(NodePool::new(balancer)),
            links: DashMap::new(),
            bus: EventBus::new(),
            signal_tx,
            shutdown_tx,
            sockets: DashMap::new(),
            closed: AtomicBool::new(false),
            config,
        });

        tokio::spawn(run_supervisor(
            Arc::downgrade(&inner),
            signal_rx,
            inner.shutdown_tx.subscribe(),
        ));
        if !orphan_retry_interval.is_zero() {
            let task = OrphanRetryTask::new(Arc::downgrade(&inner), orphan_retry_interval);
            tokio::spawn(task.run(inner.shutdown_tx.subscribe()));
        }

        Self { inner }
    }

    /// Creates a client and connects every node listed in the configuration.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let nodes = config.nodes.clone();
        let client = Self::new(config);
        for node in nodes {
            client.add_node(node)?;
        }
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        self.inner.pool.balancer()
    }

    // --- Nodes ---

    /// Registers a node and starts its event channel.
    pub fn add_node(&self, config: NodeConfig) -> Result<Arc<NodeHandle>> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let node = self.register_node(config, transport)?;
        let identity = SocketIdentity {
            user_id: self.inner.config.user_id,
            client_name: self.inner.config.client_name.clone(),
        };
        let handle = socket::spawn(node.clone(), identity);
        self.inner.sockets.insert(node.name().to_string(), handle);
        Ok(node)
    }

    /// Registers a node backed by `transport` without opening an event channel.
    ///
    /// The node stays unavailable until it is fed a ready message.
    pub fn register_node(&self, config: NodeConfig, transport: Arc<dyn NodeTransport>) -> Result<Arc<NodeHandle>> {
        self.ensure_open()?;
        config.validate()?;
        if self.inner.pool.contains(&config.name) {
            return Err(LavalinkError::DuplicateNode(config.name));
        }
        let node = NodeHandle::with_signals(
            config,
            transport,
            self.inner.bus.clone(),
            Some(self.inner.signal_tx.clone()),
        );
        self.inner.pool.insert(node.clone())?;
        info!(node = %node.name(), region = ?node.region(), "Node registered.");
        Ok(node)
    }

    /// Removes and closes a node, then moves every link bound to it.
    ///
    /// Returns the number of links that went through reassignment.
    pub async fn remove_node(&self, name: &str) -> Result<usize> {
        let node = self
            .inner
            .pool
            .remove(name)
            .ok_or_else(|| LavalinkError::UnknownNode(name.to_string()))?;
        node.close();
        if let Some((_, handle)) = self.inner.sockets.remove(name) {
            handle.abort();
        }

        let bound = self.inner.links_bound_to(name);
        info!(node = name, links = bound.len(), "Node removed; reassigning its links.");
        let results = join_all(bound.iter().map(|link| link.reassign(name))).await;
        Ok(results.into_iter().filter(|attempted| *attempted).count())
    }

    pub fn node(&self, name: &str) -> Option<Arc<NodeHandle>> {
        self.inner.pool.get(name)
    }

    /// Every registered node, in registration order.
    pub fn nodes(&self) -> Vec<Arc<NodeHandle>> {
        self.inner.pool.snapshot()
    }

    /// Asks the load balancer for the best node for `ctx`.
    pub fn select_node(&self, ctx: &SelectionContext) -> Result<Arc<NodeHandle>> {
        self.inner.pool.select(ctx, None)
    }

    // --- Links ---

    /// Returns the guild's link, creating an unbound one if needed.
    pub fn link(&self, guild_id: GuildId) -> Arc<Link> {
        self.inner
            .links
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(Link::new(
                    guild_id,
                    self.inner.pool.clone(),
                    self.inner.bus.clone(),
                    self.inner.config.link.clone(),
                ))
            })
            .clone()
    }

    pub fn existing_link(&self, guild_id: GuildId) -> Option<Arc<Link>> {
        self.inner.links.get(&guild_id).map(|link| link.clone())
    }

    pub fn links(&self) -> Vec<Arc<Link>> {
        self.inner.links.iter().map(|link| link.value().clone()).collect()
    }

    pub async fn get_player(&self, guild_id: GuildId) -> Result<PlayerSnapshot> {
        self.link(guild_id).get_player().await
    }

    pub async fn update_player(&self, guild_id: GuildId, update: &PlayerUpdate) -> Result<PlayerSnapshot> {
        self.link(guild_id).update_player(update).await
    }

    /// Destroys the guild's player and forgets its link.
    pub async fn destroy_player(&self, guild_id: GuildId) -> Result<()> {
        let Some(link) = self.existing_link(guild_id) else {
            return Ok(());
        };
        link.destroy_player().await?;
        self.inner.links.remove(&guild_id);
        Ok(())
    }

    // --- Events ---

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> EventSubscription {
        self.inner.bus.subscribe(handler)
    }

    pub fn subscribe_fn<F>(&self, f: F) -> EventSubscription
    where
        F: Fn(Arc<ClientEvent>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe_fn(f)
    }

    pub fn event_stream(&self) -> EventStream {
        self.inner.bus.stream()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    // --- Lifecycle ---

    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes every node, stops background tasks and drops all subscribers.
    pub fn shutdown(&self) {
        if self.inner.shutdown() {
            info!("Client shut down.");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shutdown() {
            Err(LavalinkError::Internal("client is shut down".into()))
        } else {
            Ok(())
        }
    }
}

impl ClientInner {
    fn links_bound_to(&self, node: &str) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .filter(|link| link.state().is_bound_to(node))
            .map(|link| link.value().clone())
            .collect()
    }

    /// Drops resynced players whose link has since moved to another node.
    fn evict_moved_players(&self, node: &NodeHandle, players: &[PlayerSnapshot]) {
        for snapshot in players {
            let moved = self
                .links
                .get(&snapshot.guild_id)
                .is_some_and(|link| !link.state().is_bound_to(node.name()));
            if moved {
                node.remove_cached_player(snapshot.guild_id);
                debug!(node = %node.name(), guild_id = snapshot.guild_id, "Evicted a resumed player whose link moved.");
            }
        }
    }

    pub(crate) fn orphaned_links(&self) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .filter(|link| matches!(link.state(), LinkState::Orphaned { .. }))
            .map(|link| link.value().clone())
            .collect()
    }

    /// Returns false if the client was already shut down.
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.shutdown_tx.send(());
        for node in self.pool.snapshot() {
            node.close();
        }
        for entry in self.sockets.iter() {
            entry.value().abort();
        }
        self.sockets.clear();
        self.bus.close();
        true
    }

    fn on_signal(self: &Arc<Self>, signal: NodeSignal) {
        match signal {
            NodeSignal::Lost { node } => {
                let bound = self.links_bound_to(&node);
                if bound.is_empty() {
                    return;
                }
                info!(node = %node, links = bound.len(), "Node lost; reassigning its links.");
                for link in bound {
                    let node = node.clone();
                    tokio::spawn(async move {
                        link.reassign(&node).await;
                    });
                }
            }
            NodeSignal::Ready { node, resumed } => {
                let Some(handle) = self.pool.get(&node) else {
                    return;
                };
                let orphaned = self.orphaned_links();
                let client = Arc::downgrade(self);
                tokio::spawn(async move {
                    if resumed {
                        match handle.fetch_all_players().await {
                            Ok(players) => {
                                if let Some(client) = client.upgrade() {
                                    client.evict_moved_players(&handle, &players);
                                }
                            }
                            Err(e) => warn!(node = %handle.name(), "Failed to resync players after resume: {e}"),
                        }
                    } else if let Some(timeout) = handle.config().resume_timeout
                        && let Err(e) = handle.enable_resume(timeout).await
                    {
                        warn!(node = %handle.name(), "Failed to enable session resuming: {e}");
                    }
                    if !orphaned.is_empty() {
                        retry_orphaned_links(&orphaned).await;
                    }
                });
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Routes node signals to link failover. Runs off the event delivery path so slow
/// subscribers never delay reassignment.
async fn run_supervisor(
    client: Weak<ClientInner>,
    mut signals: UnboundedReceiver<NodeSignal>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            signal = signals.recv() => {
                let Some(signal) = signal else {
                    break;
                };
                let Some(client) = client.upgrade() else {
                    break;
                };
                debug!(?signal, "Handling node signal.");
                client.on_signal(signal);
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("Node supervisor stopped.");
}
