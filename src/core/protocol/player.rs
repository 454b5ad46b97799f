// src/core/protocol/player.rs

//! Player snapshots as confirmed by a node, and the patch body used to change them.

use super::GuildId;
use super::track::Track;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The server's view of one guild's player.
///
/// A snapshot is always the whole object returned by the last successful round-trip;
/// it is never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    #[serde(with = "super::guild_id_str")]
    pub guild_id: GuildId,
    #[serde(default)]
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub state: PlayerState,
    #[serde(default)]
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: Filters,
}

impl PlayerSnapshot {
    /// The playback position in milliseconds.
    pub fn position(&self) -> u64 {
        self.state.position
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unix timestamp in milliseconds.
    pub time: u64,
    pub position: u64,
    pub connected: bool,
    /// Voice gateway ping in milliseconds, `-1` when not connected.
    pub ping: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Audio filters. Well-known filters are typed; anything else (plugin filters) is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqualizerBand>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    pub band: u8,
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timescale {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

/// The track part of a player patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdate {
    /// `Some(None)` serialises as `null` and stops the current track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Value>,
}

/// A partial update for a player. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
    /// Sent as the `noReplace` query parameter, not in the body.
    #[serde(skip)]
    pub no_replace: bool,
}

impl PlayerUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_encoded_track(mut self, encoded: impl Into<String>) -> Self {
        self.track.get_or_insert_with(TrackUpdate::default).encoded = Some(Some(encoded.into()));
        self
    }

    pub fn set_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.track.get_or_insert_with(TrackUpdate::default).identifier = Some(identifier.into());
        self
    }

    pub fn stop_track(mut self) -> Self {
        self.track.get_or_insert_with(TrackUpdate::default).encoded = Some(None);
        self
    }

    pub fn set_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn set_end_time(mut self, end_time: u64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn set_volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn set_paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn set_filters(mut self, filters: Filters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn set_voice(mut self, voice: VoiceState) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn set_no_replace(mut self, no_replace: bool) -> Self {
        self.no_replace = no_replace;
        self
    }
}

/// Body of `PATCH /v4/sessions/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resuming: Option<bool>,
    /// Seconds the node keeps players alive after the client disconnects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// The node's answer to a session update.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub resuming: bool,
    pub timeout: u64,
}
