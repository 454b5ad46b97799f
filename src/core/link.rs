// src/core/link.rs

//! The durable binding between one guild and the node serving it, and the failover
//! state machine that moves the binding when that node is lost.

use crate::config::LinkConfig;
use crate::core::balancer::{RegionFilter, SelectionContext};
use crate::core::errors::{LavalinkError, Result};
use crate::core::events::{ClientEvent, EventBus};
use crate::core::node::NodeHandle;
use crate::core::pool::NodePool;
use crate::core::protocol::{GuildId, PlayerSnapshot, PlayerUpdate};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where a link currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// No node selected yet. The first command selects one.
    Unbound,
    /// Served by the named node.
    Bound(String),
    /// The named node was lost; a replacement is being selected.
    Reassigning { from: String },
    /// No replacement could be found for the named node. Commands fail until a node
    /// becomes available and the link is retried.
    Orphaned { from: String },
}

impl LinkState {
    pub fn is_bound_to(&self, node: &str) -> bool {
        matches!(self, LinkState::Bound(name) if name == node)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Unbound => write!(f, "unbound"),
            LinkState::Bound(node) => write!(f, "bound({node})"),
            LinkState::Reassigning { from } => write!(f, "reassigning(from {from})"),
            LinkState::Orphaned { from } => write!(f, "orphaned(from {from})"),
        }
    }
}

#[derive(Debug)]
struct LinkInner {
    state: LinkState,
    node: Option<Arc<NodeHandle>>,
    context: SelectionContext,
    /// The last snapshot seen for this guild, kept across reassignment as a hint.
    last_known: Option<PlayerSnapshot>,
}

/// A guild's binding to a node.
#[derive(Debug)]
pub struct Link {
    guild_id: GuildId,
    created_at: Instant,
    inner: RwLock<LinkInner>,
    /// Serialises binding transitions. Commands never take it.
    transition: Mutex<()>,
    pool: Arc<NodePool>,
    bus: EventBus,
    config: LinkConfig,
}

impl Link {
    pub(crate) fn new(guild_id: GuildId, pool: Arc<NodePool>, bus: EventBus, config: LinkConfig) -> Self {
        Self {
            guild_id,
            created_at: Instant::now(),
            inner: RwLock::new(LinkInner {
                state: LinkState::Unbound,
                node: None,
                context: SelectionContext::new(guild_id),
                last_known: None,
            }),
            transition: Mutex::new(()),
            pool,
            bus,
            config,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state(&self) -> LinkState {
        self.inner.read().state.clone()
    }

    /// The node this link is bound to, if any.
    pub fn node(&self) -> Option<Arc<NodeHandle>> {
        self.inner.read().node.clone()
    }

    pub fn context(&self) -> SelectionContext {
        self.inner.read().context.clone()
    }

    /// Restricts future selections to nodes passing `filter`. The current binding is kept.
    pub fn set_region_filter(&self, filter: Option<RegionFilter>) {
        self.inner.write().context.region_filter = filter;
    }

    /// Sets the voice region hint used by soft-affinity providers.
    pub fn set_voice_region(&self, region: Option<String>) {
        self.inner.write().context.voice_region = region;
    }

    /// The last snapshot seen for this guild, including one carried over from a lost node.
    pub fn last_known_player(&self) -> Option<PlayerSnapshot> {
        self.inner.read().last_known.clone()
    }

    /// The bound node's cached snapshot. Never performs I/O.
    pub fn cached_player(&self) -> Option<PlayerSnapshot> {
        self.node().and_then(|node| node.cached_player(self.guild_id))
    }

    /// Returns the bound node, selecting one first if the link is unbound.
    ///
    /// A failed selection leaves the link unbound and is returned to the caller.
    pub async fn ensure_bound(&self) -> Result<Arc<NodeHandle>> {
        if let Some(node) = self.current()? {
            return Ok(node);
        }

        let _guard = self.transition.lock().await;
        if let Some(node) = self.current()? {
            return Ok(node);
        }
        let ctx = self.context();
        let node = self.pool.select(&ctx, None)?;
        self.bind(node.clone());
        info!(guild_id = self.guild_id, node = %node.name(), "Link bound.");
        Ok(node)
    }

    /// `Ok(Some)` when bound, `Ok(None)` when unbound, an error otherwise.
    fn current(&self) -> Result<Option<Arc<NodeHandle>>> {
        let inner = self.inner.read();
        match &inner.state {
            LinkState::Bound(_) => Ok(inner.node.clone()),
            LinkState::Unbound => Ok(None),
            LinkState::Reassigning { from } | LinkState::Orphaned { from } => {
                Err(LavalinkError::Unavailable(from.clone()))
            }
        }
    }

    fn bind(&self, node: Arc<NodeHandle>) {
        let mut inner = self.inner.write();
        inner.state = LinkState::Bound(node.name().to_string());
        inner.node = Some(node);
    }

    /// Moves the link off `lost`. Does nothing unless the link is bound to `lost`.
    ///
    /// Returns whether a reassignment was attempted.
    pub async fn reassign(&self, lost: &str) -> bool {
        let _guard = self.transition.lock().await;

        let old = {
            let mut inner = self.inner.write();
            if !inner.state.is_bound_to(lost) {
                return false;
            }
            inner.state = LinkState::Reassigning { from: lost.to_string() };
            inner.node.take()
        };

        if let Some(snapshot) = old.as_ref().and_then(|node| node.remove_cached_player(self.guild_id)) {
            self.inner.write().last_known = Some(snapshot);
        }

        let ctx = self.context();
        let attempts = self.config.max_reassign_attempts.max(1);
        for attempt in 1..=attempts {
            match self.pool.select(&ctx, Some(lost)) {
                Ok(node) => {
                    self.bind(node.clone());
                    info!(
                        guild_id = self.guild_id,
                        from = lost,
                        to = %node.name(),
                        attempt,
                        "Link reassigned."
                    );
                    self.bus.emit(ClientEvent::LinkReassigned {
                        node,
                        guild_id: self.guild_id,
                        previous: lost.to_string(),
                    });
                    return true;
                }
                Err(e) => {
                    debug!(guild_id = self.guild_id, attempt, attempts, "Reassignment attempt failed: {e}");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.reassign_backoff).await;
                    }
                }
            }
        }

        self.inner.write().state = LinkState::Orphaned { from: lost.to_string() };
        warn!(guild_id = self.guild_id, from = lost, "Link orphaned: no replacement node available.");
        if let Some(node) = old {
            self.bus.emit(ClientEvent::LinkOrphaned {
                node,
                guild_id: self.guild_id,
            });
        }
        true
    }

    /// Offers an orphaned link to the pool once more.
    ///
    /// Returns the new node, `Ok(None)` if the link was not orphaned, or the selection error.
    pub async fn retry_orphaned(&self) -> Result<Option<Arc<NodeHandle>>> {
        let _guard = self.transition.lock().await;
        let from = match self.state() {
            LinkState::Orphaned { from } => from,
            _ => return Ok(None),
        };

        let node = self.pool.select(&self.context(), None)?;
        self.bind(node.clone());
        info!(guild_id = self.guild_id, from = %from, to = %node.name(), "Orphaned link rebound.");
        self.bus.emit(ClientEvent::LinkReassigned {
            node: node.clone(),
            guild_id: self.guild_id,
            previous: from,
        });
        Ok(Some(node))
    }

    // --- Commands ---

    /// Fetches the player from the bound node.
    pub async fn get_player(&self) -> Result<PlayerSnapshot> {
        let node = self.ensure_bound().await?;
        let snapshot = node.fetch_player(self.guild_id).await?;
        self.accept(&node, snapshot)
    }

    pub async fn update_player(&self, update: &PlayerUpdate) -> Result<PlayerSnapshot> {
        let node = self.ensure_bound().await?;
        let snapshot = node.update_player(self.guild_id, update).await?;
        self.accept(&node, snapshot)
    }

    /// Records a snapshot answered by `node`, unless the link moved off `node` while the
    /// request was in flight. A stale answer is evicted from `node`'s cache and the
    /// command fails as if `node` had been unavailable from the start.
    fn accept(&self, node: &Arc<NodeHandle>, snapshot: PlayerSnapshot) -> Result<PlayerSnapshot> {
        let mut inner = self.inner.write();
        let still_bound = matches!(inner.state, LinkState::Bound(_))
            && inner.node.as_ref().is_some_and(|current| Arc::ptr_eq(current, node));
        if !still_bound {
            drop(inner);
            node.remove_cached_player(self.guild_id);
            debug!(guild_id = self.guild_id, node = %node.name(), "Discarding a response from a node the link left.");
            return Err(LavalinkError::Unavailable(node.name().to_string()));
        }
        inner.last_known = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Destroys the player on the bound node. Unbound and orphaned links have no remote
    /// player to destroy.
    pub async fn destroy_player(&self) -> Result<()> {
        let node = match self.current() {
            Ok(Some(node)) => node,
            Ok(None) => return Ok(()),
            Err(e) if matches!(self.state(), LinkState::Orphaned { .. }) => {
                debug!(guild_id = self.guild_id, "Destroying orphaned link locally: {e}");
                self.inner.write().last_known = None;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        node.destroy_player(self.guild_id).await?;
        self.inner.write().last_known = None;
        Ok(())
    }
}
