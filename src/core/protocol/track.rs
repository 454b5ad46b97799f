// src/core/protocol/track.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A playable track as returned by load/decode endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// The base64 blob that identifies the track to the node.
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default)]
    pub plugin_info: Value,
    #[serde(default)]
    pub user_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Length in milliseconds.
    pub length: u64,
    pub is_stream: bool,
    /// Start position in milliseconds.
    pub position: u64,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, `-1` when none.
    pub selected_track: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: Value,
    pub tracks: Vec<Track>,
}

/// The outcome of `GET /v4/loadtracks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    Search(Vec<Track>),
    /// Nodes send an empty object as data.
    Empty(Value),
    Error(super::messages::TrackException),
}

impl LoadResult {
    /// Returns every track carried by the result, in order.
    pub fn tracks(&self) -> Vec<&Track> {
        match self {
            LoadResult::Track(track) => vec![track],
            LoadResult::Playlist(playlist) => playlist.tracks.iter().collect(),
            LoadResult::Search(tracks) => tracks.iter().collect(),
            LoadResult::Empty(_) | LoadResult::Error(_) => Vec::new(),
        }
    }
}
