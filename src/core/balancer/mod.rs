// src/core/balancer/mod.rs

//! Node selection: a pluggable, ordered set of penalty providers and the load balancer
//! that ranks candidate nodes by their summed penalty.

pub mod penalty;
pub mod region;

pub use penalty::{
    CpuPenaltyProvider, FailurePenaltyProvider, FramePenaltyProvider, PenaltyProvider,
    PlayerPenaltyProvider, VoiceRegionPenaltyProvider,
};
pub use region::{RegionFilter, RegionGroup, voice_region_from_endpoint};

use crate::config::BalancerConfig;
use crate::core::errors::{LavalinkError, Result};
use crate::core::node::{NodeHandle, PenaltyInputs};
use crate::core::protocol::GuildId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// What the balancer knows about the tenant it selects for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionContext {
    pub guild_id: GuildId,
    /// A hard constraint: nodes outside it are never selected.
    pub region_filter: Option<RegionFilter>,
    /// The tenant's voice region, used by soft-affinity providers.
    pub voice_region: Option<String>,
}

impl SelectionContext {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    pub fn with_region_filter(mut self, filter: RegionFilter) -> Self {
        self.region_filter = Some(filter);
        self
    }

    pub fn with_voice_region(mut self, region: impl Into<String>) -> Self {
        self.voice_region = Some(region.into());
        self
    }
}

/// Picks the node with the lowest total penalty.
pub struct LoadBalancer {
    providers: RwLock<Vec<Arc<dyn PenaltyProvider>>>,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("providers", &self.provider_names())
            .finish()
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::from_config(&BalancerConfig::default())
    }
}

impl LoadBalancer {
    /// Creates a balancer with the given providers, evaluated in order.
    pub fn new(providers: Vec<Arc<dyn PenaltyProvider>>) -> Self {
        Self {
            providers: RwLock::new(providers),
        }
    }

    pub fn from_config(config: &BalancerConfig) -> Self {
        Self::new(
            config
                .providers
                .iter()
                .map(|kind| penalty::provider_for(*kind, config.failure_weight))
                .collect(),
        )
    }

    pub fn add_provider(&self, provider: Arc<dyn PenaltyProvider>) {
        self.providers.write().push(provider);
    }

    /// Removes every provider called `name`. Returns whether any was removed.
    pub fn remove_provider(&self, name: &str) -> bool {
        let mut providers = self.providers.write();
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        providers.len() != before
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.read().iter().map(|p| p.name()).collect()
    }

    /// The saturating sum of every provider's penalty, in registration order.
    pub fn total_penalty(&self, inputs: &PenaltyInputs, ctx: &SelectionContext) -> u64 {
        self.providers
            .read()
            .iter()
            .fold(0u64, |total, provider| total.saturating_add(provider.penalty(inputs, ctx)))
    }

    /// Selects the best eligible node.
    ///
    /// Candidates are the available nodes other than `exclude` that pass the context's
    /// region filter. Ties go to the node that comes first in `nodes`. An empty
    /// candidate set is an error; the filter is never relaxed.
    pub fn select(
        &self,
        nodes: &[Arc<NodeHandle>],
        ctx: &SelectionContext,
        exclude: Option<&str>,
    ) -> Result<Arc<NodeHandle>> {
        let mut best: Option<(&Arc<NodeHandle>, u64)> = None;
        for (node, penalty) in self.candidates(nodes, ctx, exclude) {
            if best.is_none_or(|(_, lowest)| penalty < lowest) {
                best = Some((node, penalty));
            }
        }

        match best {
            Some((node, penalty)) => {
                debug!(guild_id = ctx.guild_id, node = %node.name(), penalty, "Selected node.");
                Ok(node.clone())
            }
            None => Err(LavalinkError::NoAvailableNode(describe_miss(nodes.len(), ctx, exclude))),
        }
    }

    /// The total penalty of every eligible node, in input order.
    pub fn ranking(
        &self,
        nodes: &[Arc<NodeHandle>],
        ctx: &SelectionContext,
    ) -> Vec<(String, u64)> {
        self.candidates(nodes, ctx, None)
            .map(|(node, penalty)| (node.name().to_string(), penalty))
            .collect()
    }

    fn candidates<'a>(
        &'a self,
        nodes: &'a [Arc<NodeHandle>],
        ctx: &'a SelectionContext,
        exclude: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a Arc<NodeHandle>, u64)> + 'a {
        nodes
            .iter()
            .filter(|node| node.is_available())
            .filter(move |node| exclude != Some(node.name()))
            .filter(move |node| {
                ctx.region_filter
                    .as_ref()
                    .is_none_or(|filter| filter.allows(node.region()))
            })
            .map(move |node| (node, self.total_penalty(&node.penalty_inputs(), ctx)))
    }
}

fn describe_miss(pool: usize, ctx: &SelectionContext, exclude: Option<&str>) -> String {
    let mut reason = format!("none of {pool} registered node(s) is eligible");
    if let Some(filter) = &ctx.region_filter {
        reason.push_str(&format!(" for {filter}"));
    }
    if let Some(excluded) = exclude {
        reason.push_str(&format!(" (excluding '{excluded}')"));
    }
    reason
}
