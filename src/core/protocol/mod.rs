// src/core/protocol/mod.rs

//! Data-transfer types for the node REST API and event channel.
//!
//! These mirror the JSON shapes a Lavalink v4 node speaks. The core treats them as opaque
//! payloads: it forwards them, caches the last confirmed player snapshot and reads a few
//! fields (session id, stats) for bookkeeping.

pub mod messages;
pub mod player;
pub mod stats;
pub mod track;

pub use messages::{NodeEvent, NodeMessage, ReadyPayload, TrackEndReason, TrackException};
pub use player::{
    Filters, PlayerSnapshot, PlayerState, PlayerUpdate, SessionInfo, SessionUpdate, TrackUpdate,
    VoiceState,
};
pub use stats::{CpuStats, FrameStats, MemoryStats, NodeStats};
pub use track::{LoadResult, Playlist, PlaylistInfo, Track, TrackInfo};

/// The tenant identifier. Nodes send it as a decimal string.
pub type GuildId = u64;

/// Serde helpers for guild ids carried as JSON strings.
pub(crate) mod guild_id_str {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s.parse().map_err(D::Error::custom),
            Raw::Num(n) => Ok(n),
        }
    }
}
