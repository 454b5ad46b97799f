// src/core/node/mod.rs

//! The handle to one remote node: availability, session, stats, the local player cache
//! and every REST operation the client issues against it.

pub mod socket;
pub mod state;
pub mod transport;

pub use state::{FailureTracker, PenaltyInputs};
pub use transport::{HttpTransport, Method, NodeTransport, RestRequest, RestResponse};

use crate::config::NodeConfig;
use crate::core::balancer::RegionGroup;
use crate::core::errors::{LavalinkError, Result};
use crate::core::events::{ClientEvent, EventBus};
use crate::core::protocol::{
    GuildId, LoadResult, NodeEvent, NodeMessage, NodeStats, PlayerSnapshot, PlayerUpdate,
    SessionInfo, SessionUpdate, Track,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle notifications a node sends to the registry supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSignal {
    /// The node completed the ready handshake.
    Ready { node: String, resumed: bool },
    /// The node's availability flipped from true to false.
    Lost { node: String },
}

/// A handle to one node.
///
/// Handles are always shared behind an `Arc`; every event they emit carries that `Arc`
/// so subscribers can issue follow-up requests against the originating node.
pub struct NodeHandle {
    name: String,
    config: NodeConfig,
    me: Weak<NodeHandle>,
    available: AtomicBool,
    session_id: RwLock<Option<String>>,
    stats: RwLock<Option<NodeStats>>,
    inputs: RwLock<PenaltyInputs>,
    failures: FailureTracker,
    consecutive_timeouts: AtomicU32,
    players: DashMap<GuildId, PlayerSnapshot>,
    transport: Arc<dyn NodeTransport>,
    permits: Semaphore,
    bus: EventBus,
    signals: Option<UnboundedSender<NodeSignal>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.name)
            .field("available", &self.is_available())
            .field("session_id", &*self.session_id.read())
            .field("players", &self.players.len())
            .finish()
    }
}

impl NodeHandle {
    /// Creates a standalone handle that reports to `bus` only.
    pub fn new(config: NodeConfig, transport: Arc<dyn NodeTransport>, bus: EventBus) -> Arc<Self> {
        Self::with_signals(config, transport, bus, None)
    }

    pub(crate) fn with_signals(
        config: NodeConfig,
        transport: Arc<dyn NodeTransport>,
        bus: EventBus,
        signals: Option<UnboundedSender<NodeSignal>>,
    ) -> Arc<Self> {
        let inputs = PenaltyInputs::from_stats(None, 0, config.region);
        Arc::new_cyclic(|me| Self {
            name: config.name.clone(),
            me: me.clone(),
            available: AtomicBool::new(false),
            session_id: RwLock::new(config.session_id.clone()),
            stats: RwLock::new(None),
            inputs: RwLock::new(inputs),
            failures: FailureTracker::new(config.failure_window),
            consecutive_timeouts: AtomicU32::new(0),
            players: DashMap::new(),
            transport,
            permits: Semaphore::new(config.max_concurrent_requests),
            bus,
            signals,
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn region(&self) -> Option<RegionGroup> {
        self.config.region
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    /// The current penalty inputs, with the failure count evaluated now.
    pub fn penalty_inputs(&self) -> PenaltyInputs {
        let mut inputs = self.inputs.read().clone();
        inputs.recent_failures = self.failures.count();
        inputs
    }

    /// A token cancelled when the node is closed.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // --- Player cache ---

    /// The last snapshot confirmed by this node for `guild_id`. Never performs I/O.
    pub fn cached_player(&self, guild_id: GuildId) -> Option<PlayerSnapshot> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn cached_players(&self) -> Vec<PlayerSnapshot> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn remove_cached_player(&self, guild_id: GuildId) -> Option<PlayerSnapshot> {
        self.players.remove(&guild_id).map(|(_, snapshot)| snapshot)
    }

    // --- REST operations ---

    /// Fetches the player for `guild_id` and replaces the cached snapshot.
    pub async fn fetch_player(&self, guild_id: GuildId) -> Result<PlayerSnapshot> {
        let session_id = self.require_session()?;
        let request = RestRequest::get(player_path(&session_id, guild_id));
        match self.request(request).await {
            Ok(response) => {
                let snapshot: PlayerSnapshot = response.json()?;
                self.players.insert(guild_id, snapshot.clone());
                Ok(snapshot)
            }
            Err(LavalinkError::NotFound(message)) => {
                self.players.remove(&guild_id);
                Err(LavalinkError::NotFound(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches every player of the session and refreshes the cache for each of them.
    pub async fn fetch_all_players(&self) -> Result<Vec<PlayerSnapshot>> {
        let session_id = self.require_session()?;
        let request = RestRequest::get(format!("/v4/sessions/{session_id}/players"));
        let players: Vec<PlayerSnapshot> = self.request(request).await?.json()?;
        for snapshot in &players {
            self.players.insert(snapshot.guild_id, snapshot.clone());
        }
        debug!(node = %self.name, count = players.len(), "Refreshed cached players.");
        Ok(players)
    }

    /// Applies `update` to the player and caches the snapshot the node answers with.
    pub async fn update_player(&self, guild_id: GuildId, update: &PlayerUpdate) -> Result<PlayerSnapshot> {
        let session_id = self.require_session()?;
        let request = RestRequest::new(Method::PATCH, player_path(&session_id, guild_id))
            .query("noReplace", update.no_replace.to_string())
            .json(update)?;
        let snapshot: PlayerSnapshot = self.request(request).await?.json()?;
        self.players.insert(guild_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Destroys the player. The cache entry is dropped once the node confirms it is gone.
    pub async fn destroy_player(&self, guild_id: GuildId) -> Result<()> {
        let session_id = self.require_session()?;
        let request = RestRequest::new(Method::DELETE, player_path(&session_id, guild_id));
        match self.request(request).await {
            Ok(_) | Err(LavalinkError::NotFound(_)) => {
                self.players.remove(&guild_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let request = RestRequest::get("/v4/decodetrack").query("encodedTrack", encoded);
        self.request(request).await?.json()
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let request = RestRequest::new(Method::POST, "/v4/decodetracks").json(&encoded)?;
        self.request(request).await?.json()
    }

    /// Resolves an identifier (URL or `ytsearch:`-style query) into tracks.
    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult> {
        let request = RestRequest::get("/v4/loadtracks").query("identifier", identifier);
        self.request(request).await?.json()
    }

    /// The node's `/v4/info` document.
    pub async fn info(&self) -> Result<serde_json::Value> {
        self.request(RestRequest::get("/v4/info")).await?.json()
    }

    /// Enables session resuming; players survive a disconnect for `timeout`.
    pub async fn enable_resume(&self, timeout: Duration) -> Result<SessionInfo> {
        self.update_session(SessionUpdate {
            resuming: Some(true),
            timeout: Some(timeout.as_secs()),
        })
        .await
    }

    pub async fn disable_resume(&self) -> Result<SessionInfo> {
        self.update_session(SessionUpdate {
            resuming: Some(false),
            timeout: None,
        })
        .await
    }

    async fn update_session(&self, update: SessionUpdate) -> Result<SessionInfo> {
        let session_id = self.require_session()?;
        let request = RestRequest::new(Method::PATCH, format!("/v4/sessions/{session_id}")).json(&update)?;
        self.request(request).await?.json()
    }

    /// Sends an arbitrary request and returns the raw answer, whatever its status.
    pub async fn send_custom_request(&self, request: RestRequest) -> Result<RestResponse> {
        self.round_trip(request).await
    }

    async fn request(&self, request: RestRequest) -> Result<RestResponse> {
        self.round_trip(request).await?.error_for_status()
    }

    /// Executes one round-trip under the node's concurrency, timeout and cancellation rules.
    async fn round_trip(&self, request: RestRequest) -> Result<RestResponse> {
        self.ensure_available()?;

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(LavalinkError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| LavalinkError::Cancelled)?,
        };

        let timeout = self.config.request_timeout;
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(LavalinkError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.transport.execute(request)) => outcome,
        };

        match outcome {
            Err(_) => {
                self.on_timeout();
                Err(LavalinkError::Timeout {
                    node: self.name.clone(),
                    timeout,
                })
            }
            Ok(Err(e)) if e.is_connectivity_loss() => {
                self.record_failure();
                self.mark_unavailable(&format!("REST connection failed: {e}"));
                Err(e)
            }
            Ok(Err(e)) => Err(e),
            // Availability lost while this request was in flight stays lost; only a
            // ready handshake restores it.
            Ok(Ok(response)) => {
                self.consecutive_timeouts.store(0, Ordering::Relaxed);
                Ok(response)
            }
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LavalinkError::Unavailable(self.name.clone()))
        }
    }

    fn require_session(&self) -> Result<String> {
        self.ensure_available()?;
        self.session_id()
            .ok_or_else(|| LavalinkError::Unavailable(self.name.clone()))
    }

    fn on_timeout(&self) {
        self.record_failure();
        let count = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
        let budget = self.config.max_consecutive_timeouts;
        warn!(node = %self.name, count, budget, "Request timed out.");
        if budget > 0 && count >= budget {
            self.mark_unavailable(&format!("{count} consecutive request timeouts"));
        }
    }

    fn record_failure(&self) {
        let count = self.failures.record();
        self.inputs.write().recent_failures = count;
    }

    // --- Event channel ---

    /// Applies one message received over the node's event channel.
    pub fn on_message(&self, message: NodeMessage) {
        let Some(node) = self.me.upgrade() else {
            return;
        };
        match message {
            NodeMessage::Ready(ready) => {
                *self.session_id.write() = Some(ready.session_id.clone());
                self.consecutive_timeouts.store(0, Ordering::Relaxed);
                self.available.store(true, Ordering::Release);
                info!(node = %self.name, session_id = %ready.session_id, resumed = ready.resumed, "Node is ready.");
                self.bus.emit(ClientEvent::Ready {
                    node,
                    session_id: ready.session_id,
                    resumed: ready.resumed,
                });
                self.signal(NodeSignal::Ready {
                    node: self.name.clone(),
                    resumed: ready.resumed,
                });
            }
            NodeMessage::Stats(stats) => {
                *self.inputs.write() =
                    PenaltyInputs::from_stats(Some(&stats), self.failures.count(), self.config.region);
                *self.stats.write() = Some(stats.clone());
                self.bus.emit(ClientEvent::Stats { node, stats });
            }
            NodeMessage::PlayerUpdate { guild_id, state } => {
                self.bus.emit(ClientEvent::PlayerUpdate { node, guild_id, state });
            }
            NodeMessage::Event(event) => self.on_event(node, event),
            NodeMessage::Unknown(value) => {
                debug!(node = %self.name, "Ignoring unknown message: {value}");
            }
        }
    }

    fn on_event(&self, node: Arc<NodeHandle>, event: NodeEvent) {
        let event = match event {
            NodeEvent::TrackStart { guild_id, track } => ClientEvent::TrackStart { node, guild_id, track },
            NodeEvent::TrackEnd {
                guild_id,
                track,
                reason,
            } => ClientEvent::TrackEnd {
                node,
                guild_id,
                track,
                reason,
            },
            NodeEvent::TrackException {
                guild_id,
                track,
                exception,
            } => {
                self.record_failure();
                ClientEvent::TrackException {
                    node,
                    guild_id,
                    track,
                    exception,
                }
            }
            NodeEvent::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            } => {
                self.record_failure();
                ClientEvent::TrackStuck {
                    node,
                    guild_id,
                    track,
                    threshold_ms,
                }
            }
            NodeEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            } => ClientEvent::ConnectionClosed {
                node,
                guild_id: Some(guild_id),
                code,
                reason,
                by_remote,
            },
        };
        self.bus.emit(event);
    }

    /// Called when the event channel closes.
    pub fn on_socket_closed(&self, code: u16, reason: &str, by_remote: bool) {
        if let Some(node) = self.me.upgrade() {
            self.bus.emit(ClientEvent::ConnectionClosed {
                node,
                guild_id: None,
                code,
                reason: reason.to_string(),
                by_remote,
            });
        }
        self.mark_unavailable(&format!("event channel closed ({code}): {reason}"));
    }

    /// Flips availability to false. Only the first call after the node was available
    /// emits `NodeUnavailable` and notifies the registry.
    pub fn mark_unavailable(&self, reason: &str) {
        if !self.available.swap(false, Ordering::AcqRel) {
            return;
        }
        warn!(node = %self.name, "Node became unavailable: {reason}");
        if let Some(node) = self.me.upgrade() {
            self.bus.emit(ClientEvent::NodeUnavailable {
                node,
                reason: reason.to_string(),
            });
        }
        self.signal(NodeSignal::Lost {
            node: self.name.clone(),
        });
    }

    /// Closes the node: cancels in-flight requests and stops the event channel.
    /// Does not notify the registry; the caller owns any follow-up.
    pub fn close(&self) {
        self.available.store(false, Ordering::Release);
        self.cancel.cancel();
        self.permits.close();
        info!(node = %self.name, "Node closed.");
    }

    fn signal(&self, signal: NodeSignal) {
        if let Some(tx) = &self.signals
            && tx.send(signal).is_err()
        {
            debug!(node = %self.name, "Registry supervisor is gone; dropping node signal.");
        }
    }
}

fn player_path(session_id: &str, guild_id: GuildId) -> String {
    format!("/v4/sessions/{session_id}/players/{guild_id}")
}
