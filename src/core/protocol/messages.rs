// src/core/protocol/messages.rs

//! Messages received over a node's event channel.

use super::GuildId;
use super::player::PlayerState;
use super::stats::NodeStats;
use super::track::Track;
use crate::core::errors::{LavalinkError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded event-channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeMessage {
    Ready(ReadyPayload),
    Stats(NodeStats),
    PlayerUpdate { guild_id: GuildId, state: PlayerState },
    Event(NodeEvent),
    /// An op this client does not understand. Kept so it can be logged.
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerUpdatePayload {
    #[serde(with = "super::guild_id_str")]
    guild_id: GuildId,
    state: PlayerState,
}

/// Player-scoped events emitted by the node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart {
        #[serde(with = "super::guild_id_str")]
        guild_id: GuildId,
        track: Track,
    },
    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        #[serde(with = "super::guild_id_str")]
        guild_id: GuildId,
        track: Track,
        reason: TrackEndReason,
    },
    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        #[serde(with = "super::guild_id_str")]
        guild_id: GuildId,
        track: Track,
        exception: TrackException,
    },
    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        #[serde(with = "super::guild_id_str")]
        guild_id: GuildId,
        track: Track,
        threshold_ms: u64,
    },
    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        #[serde(with = "super::guild_id_str")]
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl NodeEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            NodeEvent::TrackStart { guild_id, .. }
            | NodeEvent::TrackEnd { guild_id, .. }
            | NodeEvent::TrackException { guild_id, .. }
            | NodeEvent::TrackStuck { guild_id, .. }
            | NodeEvent::WebSocketClosed { guild_id, .. } => *guild_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether a queue should move on to its next track.
    pub fn may_start_next(&self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: String,
    pub cause: String,
}

impl NodeMessage {
    /// Parses one text frame from the event channel.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| LavalinkError::Serialization("message without 'op' field".into()))?;

        let message = match op {
            "ready" => NodeMessage::Ready(serde_json::from_value(value)?),
            "stats" => NodeMessage::Stats(serde_json::from_value(value)?),
            "playerUpdate" => {
                let payload: PlayerUpdatePayload = serde_json::from_value(value)?;
                NodeMessage::PlayerUpdate {
                    guild_id: payload.guild_id,
                    state: payload.state,
                }
            }
            "event" => NodeMessage::Event(serde_json::from_value(value)?),
            _ => NodeMessage::Unknown(value),
        };
        Ok(message)
    }
}
