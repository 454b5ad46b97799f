// src/core/balancer/penalty.rs

//! Penalty providers. Each one turns a node's penalty inputs into a non-negative score;
//! lower is better.

use super::SelectionContext;
use crate::config::ProviderKind;
use crate::core::node::PenaltyInputs;
use std::sync::Arc;

/// A pure scoring function over a node's penalty inputs.
///
/// Implementations must not perform I/O; they run on every selection.
pub trait PenaltyProvider: Send + Sync + 'static {
    /// Stable name used to remove the provider at runtime and in diagnostics.
    fn name(&self) -> &'static str;

    fn penalty(&self, inputs: &PenaltyInputs, ctx: &SelectionContext) -> u64;
}

/// Converts a float penalty into the integer domain, clamping negatives and NaN to zero.
fn to_penalty(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else if value.is_infinite() && value > 0.0 {
        u64::MAX
    } else {
        0
    }
}

/// One point per playing player.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlayerPenaltyProvider;

impl PenaltyProvider for PlayerPenaltyProvider {
    fn name(&self) -> &'static str {
        "players"
    }

    fn penalty(&self, inputs: &PenaltyInputs, _ctx: &SelectionContext) -> u64 {
        u64::from(inputs.playing_players)
    }
}

/// Grows exponentially with the host's system load.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuPenaltyProvider;

impl PenaltyProvider for CpuPenaltyProvider {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn penalty(&self, inputs: &PenaltyInputs, _ctx: &SelectionContext) -> u64 {
        to_penalty(1.05f64.powf(100.0 * inputs.cpu_system_load) * 10.0 - 10.0)
    }
}

/// Penalises frames the node failed to deliver. Nodes that report no frame stats score 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct FramePenaltyProvider;

impl PenaltyProvider for FramePenaltyProvider {
    fn name(&self) -> &'static str {
        "frames"
    }

    fn penalty(&self, inputs: &PenaltyInputs, _ctx: &SelectionContext) -> u64 {
        let deficit = inputs.frames_deficit.map_or(0, |deficit| {
            to_penalty(1.03f64.powf(500.0 * (deficit as f64 / 3000.0)) * 600.0 - 600.0)
        });
        let nulled = inputs.frames_nulled.map_or(0, |nulled| {
            to_penalty((1.03f64.powf(500.0 * (nulled as f64 / 3000.0)) * 300.0 - 300.0) * 2.0)
        });
        deficit.saturating_add(nulled)
    }
}

/// A fixed weight per failure recorded within the node's failure window.
#[derive(Debug, Clone, Copy)]
pub struct FailurePenaltyProvider {
    weight: u64,
}

impl FailurePenaltyProvider {
    pub fn new(weight: u64) -> Self {
        Self { weight }
    }
}

impl Default for FailurePenaltyProvider {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PenaltyProvider for FailurePenaltyProvider {
    fn name(&self) -> &'static str {
        "failures"
    }

    fn penalty(&self, inputs: &PenaltyInputs, _ctx: &SelectionContext) -> u64 {
        u64::from(inputs.recent_failures).saturating_mul(self.weight)
    }
}

/// Soft affinity towards nodes close to the tenant's voice server.
///
/// Unlike the region filter this never excludes a node; it only prefers matching ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoiceRegionPenaltyProvider;

impl VoiceRegionPenaltyProvider {
    pub const UNTAGGED: u64 = 500;
    pub const MISMATCH: u64 = 1000;
}

impl PenaltyProvider for VoiceRegionPenaltyProvider {
    fn name(&self) -> &'static str {
        "voice-region"
    }

    fn penalty(&self, inputs: &PenaltyInputs, ctx: &SelectionContext) -> u64 {
        let Some(voice_region) = ctx.voice_region.as_deref() else {
            return 0;
        };
        match inputs.region {
            Some(group) if group.contains(voice_region) => 0,
            Some(_) => Self::MISMATCH,
            None => Self::UNTAGGED,
        }
    }
}

/// Builds the provider named by a configuration entry.
pub fn provider_for(kind: ProviderKind, failure_weight: u64) -> Arc<dyn PenaltyProvider> {
    match kind {
        ProviderKind::Players => Arc::new(PlayerPenaltyProvider),
        ProviderKind::Cpu => Arc::new(CpuPenaltyProvider),
        ProviderKind::Frames => Arc::new(FramePenaltyProvider),
        ProviderKind::Failures => Arc::new(FailurePenaltyProvider::new(failure_weight)),
        ProviderKind::VoiceRegion => Arc::new(VoiceRegionPenaltyProvider),
    }
}
