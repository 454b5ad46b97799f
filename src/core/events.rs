// src/core/events.rs

//! Defines the domain events emitted by nodes and links, and the event bus that fans
//! them out to subscribers.

use crate::core::node::NodeHandle;
use crate::core::protocol::{GuildId, NodeStats, PlayerState, Track, TrackEndReason, TrackException};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};

/// An event tagged with the node it originated from.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The node accepted the event channel and assigned a session.
    Ready {
        node: Arc<NodeHandle>,
        session_id: String,
        resumed: bool,
    },
    Stats {
        node: Arc<NodeHandle>,
        stats: NodeStats,
    },
    PlayerUpdate {
        node: Arc<NodeHandle>,
        guild_id: GuildId,
        state: PlayerState,
    },
    TrackStart {
        node: Arc<NodeHandle>,
        guild_id: GuildId,
        track: Track,
    },
    TrackEnd {
        node: Arc<NodeHandle>,
        guild_id: GuildId,
        track: Track,
        reason: TrackEndReason,
    },
    TrackException {
        node: Arc<NodeHandle>,
        guild_id: GuildId,
        track: Track,
        exception: TrackException,
    },
    TrackStuck {
        node: Arc<NodeHandle>,
        guild_id: GuildId,
        track: Track,
        threshold_ms: u64,
    },
    /// Either the node's event channel closed (`guild_id` is `None`) or the node reports
    /// that a guild's voice connection closed.
    ConnectionClosed {
        node: Arc<NodeHandle>,
        guild_id: Option<GuildId>,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    /// The node's availability flipped to false.
    NodeUnavailable {
        node: Arc<NodeHandle>,
        reason: String,
    },
    /// A link moved from `previous` to `node`.
    LinkReassigned {
        node: Arc<NodeHandle>,
        guild_id: GuildId,
        previous: String,
    },
    /// A link lost `node` and no replacement was available.
    LinkOrphaned {
        node: Arc<NodeHandle>,
        guild_id: GuildId,
    },
}

impl ClientEvent {
    /// The node this event originated from.
    pub fn node(&self) -> &Arc<NodeHandle> {
        match self {
            ClientEvent::Ready { node, .. }
            | ClientEvent::Stats { node, .. }
            | ClientEvent::PlayerUpdate { node, .. }
            | ClientEvent::TrackStart { node, .. }
            | ClientEvent::TrackEnd { node, .. }
            | ClientEvent::TrackException { node, .. }
            | ClientEvent::TrackStuck { node, .. }
            | ClientEvent::ConnectionClosed { node, .. }
            | ClientEvent::NodeUnavailable { node, .. }
            | ClientEvent::LinkReassigned { node, .. }
            | ClientEvent::LinkOrphaned { node, .. } => node,
        }
    }

    /// The guild the event concerns, if it is player-scoped.
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            ClientEvent::PlayerUpdate { guild_id, .. }
            | ClientEvent::TrackStart { guild_id, .. }
            | ClientEvent::TrackEnd { guild_id, .. }
            | ClientEvent::TrackException { guild_id, .. }
            | ClientEvent::TrackStuck { guild_id, .. }
            | ClientEvent::LinkReassigned { guild_id, .. }
            | ClientEvent::LinkOrphaned { guild_id, .. } => Some(*guild_id),
            ClientEvent::ConnectionClosed { guild_id, .. } => *guild_id,
            ClientEvent::Ready { .. } | ClientEvent::Stats { .. } | ClientEvent::NodeUnavailable { .. } => None,
        }
    }

    /// A short, stable name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Ready { .. } => "ready",
            ClientEvent::Stats { .. } => "stats",
            ClientEvent::PlayerUpdate { .. } => "player_update",
            ClientEvent::TrackStart { .. } => "track_start",
            ClientEvent::TrackEnd { .. } => "track_end",
            ClientEvent::TrackException { .. } => "track_exception",
            ClientEvent::TrackStuck { .. } => "track_stuck",
            ClientEvent::ConnectionClosed { .. } => "connection_closed",
            ClientEvent::NodeUnavailable { .. } => "node_unavailable",
            ClientEvent::LinkReassigned { .. } => "link_reassigned",
            ClientEvent::LinkOrphaned { .. } => "link_orphaned",
        }
    }
}

/// A type capable of handling events delivered by the bus.
///
/// Returning an error (or panicking) cancels this handler's subscription; other
/// subscribers keep receiving events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: Arc<ClientEvent>) -> anyhow::Result<()>;
}

/// Adapts a plain closure into an [`EventHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Arc<ClientEvent>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, event: Arc<ClientEvent>) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

type EventFilter = Box<dyn Fn(&ClientEvent) -> bool + Send + Sync>;

/// A stream of every event emitted after it was created.
pub type EventStream = UnboundedReceiverStream<Arc<ClientEvent>>;

struct Subscriber {
    id: u64,
    tx: UnboundedSender<Arc<ClientEvent>>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// The ordered multicast hub for all node and link events.
///
/// Every subscriber owns an unbounded buffer, so a slow subscriber never stalls the
/// producer. Events are pushed under a single lock, which gives every subscriber the
/// same order. Subscription filters run on the subscriber's own task, never under that
/// lock, so a filter may emit or subscribe.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event to every live subscriber and returns how many it was queued for.
    pub fn emit(&self, event: ClientEvent) -> usize {
        let event = Arc::new(event);
        let mut queued = 0;
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sub| match sub.tx.send(event.clone()) {
            Ok(()) => {
                queued += 1;
                true
            }
            // The receiving side is gone: the subscriber failed or was dropped.
            Err(_) => false,
        });
        if queued == 0 {
            debug!(kind = event.kind(), "Emitted an event with no active subscribers.");
        }
        queued
    }

    fn register(&self) -> (u64, UnboundedReceiver<Arc<ClientEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber { id, tx });
        (id, rx)
    }

    /// Subscribes a handler to every event.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> EventSubscription {
        self.spawn_subscriber(None, handler)
    }

    /// Subscribes a handler to the events accepted by `filter`.
    pub fn subscribe_filtered<P>(&self, filter: P, handler: Arc<dyn EventHandler>) -> EventSubscription
    where
        P: Fn(&ClientEvent) -> bool + Send + Sync + 'static,
    {
        self.spawn_subscriber(Some(Box::new(filter)), handler)
    }

    /// Subscribes a closure to every event.
    pub fn subscribe_fn<F>(&self, f: F) -> EventSubscription
    where
        F: Fn(Arc<ClientEvent>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnHandler(f)))
    }

    /// Returns a stream of every subsequent event.
    pub fn stream(&self) -> EventStream {
        let (_, rx) = self.register();
        UnboundedReceiverStream::new(rx)
    }

    fn spawn_subscriber(&self, filter: Option<EventFilter>, handler: Arc<dyn EventHandler>) -> EventSubscription {
        let (id, rx) = self.register();
        let handle = tokio::spawn(run_subscriber(id, filter, handler, rx));
        EventSubscription {
            id,
            bus: self.clone(),
            handle,
        }
    }

    /// Removes a subscriber. Its task ends once the buffered events are drained.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != id);
        subscribers.len() != before
    }

    /// The number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sub| !sub.tx.is_closed());
        subscribers.len()
    }

    /// Drops every subscriber.
    pub fn close(&self) {
        self.inner.subscribers.lock().clear();
    }
}

/// Delivers events to one handler until it fails or the bus drops it.
async fn run_subscriber(
    id: u64,
    filter: Option<EventFilter>,
    handler: Arc<dyn EventHandler>,
    mut rx: UnboundedReceiver<Arc<ClientEvent>>,
) {
    while let Some(event) = rx.recv().await {
        if let Some(filter) = &filter
            && !filter(&event)
        {
            continue;
        }
        let kind = event.kind();
        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(subscriber = id, kind, "Event subscriber failed: {e:#}. Cancelling its subscription.");
                break;
            }
            Err(_) => {
                error!(subscriber = id, kind, "Event subscriber panicked. Cancelling its subscription.");
                break;
            }
        }
    }
    // Dropping `rx` here makes the next `emit` prune this subscriber.
}

/// A handle to a running subscription.
pub struct EventSubscription {
    id: u64,
    bus: EventBus,
    handle: JoinHandle<()>,
}

impl EventSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the subscriber is still receiving events.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel this subscription and await its completion.
    pub async fn cancel(self) {
        self.bus.unsubscribe(self.id);
        self.handle.abort();
        if let Err(err) = self.handle.await
            && !err.is_cancelled()
        {
            error!(error = ?err, "error awaiting subscription shutdown");
        }
    }
}
