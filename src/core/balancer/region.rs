// src/core/balancer/region.rs

//! Voice regions, region groups and the hard region filter applied during selection.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// A coarse geographic group of voice regions. A node may be tagged with one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RegionGroup {
    Asia,
    Europe,
    Us,
    SouthAmerica,
}

impl RegionGroup {
    /// The voice region identifiers that belong to this group.
    pub fn regions(&self) -> &'static [&'static str] {
        match self {
            RegionGroup::Asia => &[
                "sydney",
                "singapore",
                "japan",
                "hongkong",
                "india",
                "south-korea",
                "dubai",
            ],
            RegionGroup::Europe => &[
                "rotterdam",
                "russia",
                "frankfurt",
                "amsterdam",
                "london",
                "stockholm",
                "madrid",
                "milan",
                "europe",
            ],
            RegionGroup::Us => &[
                "us-central",
                "us-east",
                "us-south",
                "us-west",
                "atlanta",
                "newark",
                "seattle",
                "montreal",
            ],
            RegionGroup::SouthAmerica => &["brazil", "santiago", "buenos-aires"],
        }
    }

    /// Whether `region` (a voice region id such as `us-east`) belongs to this group.
    pub fn contains(&self, region: &str) -> bool {
        let region = normalize_region(region);
        self.regions().iter().any(|r| *r == region)
    }

    /// Finds the group a voice region belongs to.
    pub fn from_voice_region(region: &str) -> Option<RegionGroup> {
        use strum::IntoEnumIterator;
        RegionGroup::iter().find(|group| group.contains(region))
    }
}

/// Extracts the voice region id from a voice server endpoint,
/// e.g. `us-east1234.discord.media:443` becomes `us-east`.
pub fn voice_region_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint
        .trim_start_matches("wss://")
        .split(['.', ':'])
        .next()?;
    let region = host.trim_end_matches(|c: char| c.is_ascii_digit());
    if region.is_empty() {
        None
    } else {
        Some(region.to_ascii_lowercase())
    }
}

fn normalize_region(region: &str) -> String {
    region
        .trim()
        .trim_start_matches("vip-")
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_ascii_lowercase()
}

/// A hard constraint on which nodes may serve a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionFilter {
    /// Only nodes whose group contains this voice region (or untagged nodes).
    Exact(String),
    /// Only nodes tagged with this group (or untagged nodes).
    Group(RegionGroup),
}

impl RegionFilter {
    /// Whether a node tagged with `node_region` passes this filter.
    ///
    /// Untagged nodes have no filter of their own and accept every tenant.
    pub fn allows(&self, node_region: Option<RegionGroup>) -> bool {
        let Some(node_region) = node_region else {
            return true;
        };
        match self {
            RegionFilter::Exact(region) => node_region.contains(region),
            RegionFilter::Group(group) => node_region == *group,
        }
    }
}

impl std::fmt::Display for RegionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionFilter::Exact(region) => write!(f, "region '{region}'"),
            RegionFilter::Group(group) => write!(f, "region group {group}"),
        }
    }
}
