// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use lavalink_cluster::config::{ClientConfig, LinkConfig, NodeConfig};
use lavalink_cluster::core::errors::{LavalinkError, Result};
use lavalink_cluster::core::node::{NodeTransport, RestRequest, RestResponse};
use lavalink_cluster::core::protocol::{
    CpuStats, GuildId, MemoryStats, NodeMessage, NodeStats, ReadyPayload,
};
use lavalink_cluster::{LavalinkClient, NodeHandle, RegionGroup};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

pub const USER_ID: u64 = 1_000_000_000_000_001;

/// Initializes test logging once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

type Handler = Box<dyn Fn(&RestRequest) -> Result<RestResponse> + Send + Sync>;

/// What the mock does with a request.
enum Behavior {
    /// Serve players from an in-memory store, like a real node would.
    Store,
    /// Answer every request with the given handler.
    Custom(Handler),
    /// Serve from the store, but only once the gate lets each request through.
    Gated(Arc<Notify>),
    /// Never answer.
    Hang,
}

/// A transport that never touches the network and counts every call.
pub struct MockTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<RestRequest>>,
    players: Mutex<HashMap<GuildId, Value>>,
    behavior: Behavior,
}

impl MockTransport {
    /// A transport backed by a fake player store.
    pub fn new() -> Arc<Self> {
        Self::with_behavior(Behavior::Store)
    }

    pub fn with_handler<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&RestRequest) -> Result<RestResponse> + Send + Sync + 'static,
    {
        Self::with_behavior(Behavior::Custom(Box::new(handler)))
    }

    /// A store transport that holds every request until the returned gate is notified.
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (Self::with_behavior(Behavior::Gated(gate.clone())), gate)
    }

    /// A transport whose requests never complete.
    pub fn hanging() -> Arc<Self> {
        Self::with_behavior(Behavior::Hang)
    }

    fn with_behavior(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            players: Mutex::new(HashMap::new()),
            behavior,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<RestRequest> {
        self.requests.lock().last().cloned()
    }

    /// Seeds the fake store with a player.
    pub fn insert_player(&self, guild_id: GuildId, player: Value) {
        self.players.lock().insert(guild_id, player);
    }

    /// Drops a player behind the client's back, as a node restart would.
    pub fn remove_player(&self, guild_id: GuildId) {
        self.players.lock().remove(&guild_id);
    }

    pub fn has_player(&self, guild_id: GuildId) -> bool {
        self.players.lock().contains_key(&guild_id)
    }

    fn serve_store(&self, request: &RestRequest) -> Result<RestResponse> {
        let segments: Vec<&str> = request.path.trim_start_matches('/').split('/').collect();
        match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["v4", "sessions", _, "players"]) => {
                let players: Vec<Value> = self.players.lock().values().cloned().collect();
                Ok(ok_json(&Value::Array(players)))
            }
            ("GET", ["v4", "sessions", _, "players", guild]) => {
                let guild_id = parse_guild(guild)?;
                match self.players.lock().get(&guild_id) {
                    Some(player) => Ok(ok_json(player)),
                    None => Ok(not_found(&request.path)),
                }
            }
            ("PATCH", ["v4", "sessions", _, "players", guild]) => {
                let guild_id = parse_guild(guild)?;
                let mut players = self.players.lock();
                let player = players
                    .entry(guild_id)
                    .or_insert_with(|| player_json(guild_id));
                if let (Some(body), Some(stored)) = (&request.body, player.as_object_mut()) {
                    for key in ["volume", "paused", "filters", "voice"] {
                        if let Some(value) = body.get(key) {
                            stored.insert(key.to_string(), value.clone());
                        }
                    }
                    if let Some(position) = body.get("position") {
                        stored["state"]["position"] = position.clone();
                    }
                }
                Ok(ok_json(player))
            }
            ("DELETE", ["v4", "sessions", _, "players", guild]) => {
                let guild_id = parse_guild(guild)?;
                match self.players.lock().remove(&guild_id) {
                    Some(_) => Ok(RestResponse::new(204, Vec::<u8>::new())),
                    None => Ok(not_found(&request.path)),
                }
            }
            ("PATCH", ["v4", "sessions", _]) => {
                let body = request.body.clone().unwrap_or(Value::Null);
                Ok(ok_json(&json!({
                    "resuming": body.get("resuming").and_then(Value::as_bool).unwrap_or(false),
                    "timeout": body.get("timeout").and_then(Value::as_u64).unwrap_or(60),
                })))
            }
            ("GET", ["v4", "info"]) => Ok(ok_json(&json!({ "version": { "semver": "4.0.8" } }))),
            _ => Ok(RestResponse::new(
                400,
                json!({ "status": 400, "error": "Bad Request", "message": "unsupported", "path": request.path })
                    .to_string(),
            )),
        }
    }
}

#[async_trait]
impl NodeTransport for MockTransport {
    async fn execute(&self, request: RestRequest) -> Result<RestResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        match &self.behavior {
            Behavior::Store => self.serve_store(&request),
            Behavior::Custom(handler) => handler(&request),
            Behavior::Gated(gate) => {
                gate.notified().await;
                self.serve_store(&request)
            }
            Behavior::Hang => {
                futures::future::pending::<()>().await;
                Err(LavalinkError::Internal("unreachable".into()))
            }
        }
    }
}

fn parse_guild(segment: &str) -> Result<GuildId> {
    segment
        .parse()
        .map_err(|_| LavalinkError::Internal(format!("bad guild id '{segment}'")))
}

pub fn ok_json(value: &Value) -> RestResponse {
    RestResponse::new(200, value.to_string())
}

pub fn not_found(path: &str) -> RestResponse {
    RestResponse::new(
        404,
        json!({
            "timestamp": 1667857581613u64,
            "status": 404,
            "error": "Not Found",
            "message": "Player not found",
            "path": path,
        })
        .to_string(),
    )
}

/// A player as a node would return it.
pub fn player_json(guild_id: GuildId) -> Value {
    json!({
        "guildId": guild_id.to_string(),
        "track": null,
        "volume": 100,
        "paused": false,
        "state": { "time": 1500467109, "position": 0, "connected": true, "ping": 50 },
        "voice": { "token": "token", "endpoint": "us-east1234.discord.media", "sessionId": "voice" },
        "filters": {}
    })
}

pub fn track_json(title: &str) -> Value {
    json!({
        "encoded": "QAAAjQIAJVJpY2sgQXN0bGV5IC0gTmV2ZXIgR29ubmEgR2l2ZSBZb3UgVXAADlJpY2tBc3RsZXlWRVZPAAAAAAADPCAAC2RRdzR3OVdnWGNRAAEAK2h0dHBzOi8vd3d3LnlvdXR1YmUuY29tL3dhdGNoP3Y9ZFF3NHc5V2dYY1EAB3lvdXR1YmUAAAAAAAAAAA==",
        "info": {
            "identifier": "dQw4w9WgXcQ",
            "isSeekable": true,
            "author": "RickAstleyVEVO",
            "length": 212000,
            "isStream": false,
            "position": 0,
            "title": title,
            "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "youtube"
        },
        "pluginInfo": {},
        "userData": {}
    })
}

pub fn node_config(name: &str) -> NodeConfig {
    NodeConfig::new(name, format!("ws://{name}.test:2333"), "youshallnotpass")
        .with_request_timeout(Duration::from_millis(200))
}

/// Stats with the given number of playing players and an idle CPU.
pub fn stats(playing_players: u32) -> NodeStats {
    NodeStats {
        players: playing_players,
        playing_players,
        uptime: 123_456,
        memory: MemoryStats {
            free: 1024,
            used: 1024,
            allocated: 2048,
            reservable: 4096,
        },
        cpu: CpuStats {
            cores: 4,
            system_load: 0.0,
            lavalink_load: 0.0,
        },
        frame_stats: None,
    }
}

/// Feeds a ready message to the node, making it available.
pub fn make_ready(node: &NodeHandle) {
    node.on_message(NodeMessage::Ready(ReadyPayload {
        resumed: false,
        session_id: format!("session-{}", node.name()),
    }));
}

pub fn send_stats(node: &NodeHandle, playing_players: u32) {
    node.on_message(NodeMessage::Stats(stats(playing_players)));
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// A client with mock-backed nodes.
pub struct TestContext {
    pub client: LavalinkClient,
    pub transports: HashMap<String, Arc<MockTransport>>,
}

impl TestContext {
    /// A client with a single reassignment attempt and no backoff, so failover is fast.
    pub fn new() -> Self {
        let mut config = ClientConfig::new(USER_ID);
        config.link = LinkConfig {
            max_reassign_attempts: 1,
            reassign_backoff: Duration::ZERO,
            orphan_retry_interval: Duration::ZERO,
        };
        Self::with_config(config)
    }

    pub fn with_config(config: ClientConfig) -> Self {
        init_tracing();
        Self {
            client: LavalinkClient::new(config),
            transports: HashMap::new(),
        }
    }

    /// Registers a node backed by a store transport. It is not ready yet.
    pub fn add_node(&mut self, name: &str, region: Option<RegionGroup>) -> Arc<NodeHandle> {
        let mut config = node_config(name);
        config.region = region;
        self.add_node_with(config, MockTransport::new())
    }

    pub fn add_node_with(&mut self, config: NodeConfig, transport: Arc<MockTransport>) -> Arc<NodeHandle> {
        let name = config.name.clone();
        let node = self
            .client
            .register_node(config, transport.clone())
            .expect("node registration failed");
        self.transports.insert(name, transport);
        node
    }

    /// Registers a node, marks it ready and reports `playing_players`.
    pub fn add_ready_node(&mut self, name: &str, playing_players: u32) -> Arc<NodeHandle> {
        let node = self.add_node(name, None);
        make_ready(&node);
        send_stats(&node, playing_players);
        node
    }

    pub fn transport(&self, name: &str) -> Arc<MockTransport> {
        self.transports[name].clone()
    }
}
