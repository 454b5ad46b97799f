// src/core/node/state.rs

//! Load-scoring inputs tracked per node.

use crate::core::balancer::RegionGroup;
use crate::core::protocol::NodeStats;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-node facts consumed by penalty providers.
///
/// Recomputed on every stats update and every recorded failure; never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PenaltyInputs {
    pub players: u32,
    pub playing_players: u32,
    pub cpu_cores: u32,
    pub cpu_system_load: f64,
    pub cpu_lavalink_load: f64,
    /// Average frames per minute the node failed to send, if it reports frame stats.
    pub frames_deficit: Option<i64>,
    pub frames_nulled: Option<i64>,
    /// Failures recorded within the node's failure window.
    pub recent_failures: u32,
    /// The region group the node is tagged with.
    pub region: Option<RegionGroup>,
}

impl PenaltyInputs {
    /// Builds the inputs from the last reported stats.
    pub fn from_stats(stats: Option<&NodeStats>, recent_failures: u32, region: Option<RegionGroup>) -> Self {
        let Some(stats) = stats else {
            return Self {
                recent_failures,
                region,
                ..Default::default()
            };
        };
        Self {
            players: stats.players,
            playing_players: stats.playing_players,
            cpu_cores: stats.cpu.cores,
            cpu_system_load: stats.cpu.system_load,
            cpu_lavalink_load: stats.cpu.lavalink_load,
            frames_deficit: stats.frame_stats.as_ref().map(|f| f.deficit),
            frames_nulled: stats.frame_stats.as_ref().map(|f| f.nulled),
            recent_failures,
            region,
        }
    }
}

/// A sliding window of failure timestamps.
#[derive(Debug)]
pub struct FailureTracker {
    window: Duration,
    failures: Mutex<VecDeque<Instant>>,
}

impl FailureTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Records a failure now and returns the count inside the window.
    pub fn record(&self) -> u32 {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        failures.push_back(now);
        Self::prune(&mut failures, now, self.window);
        failures.len() as u32
    }

    /// The number of failures inside the window.
    pub fn count(&self) -> u32 {
        let mut failures = self.failures.lock();
        Self::prune(&mut failures, Instant::now(), self.window);
        failures.len() as u32
    }

    fn prune(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = failures.front() {
            if now.duration_since(*oldest) > window {
                failures.pop_front();
            } else {
                break;
            }
        }
    }
}
