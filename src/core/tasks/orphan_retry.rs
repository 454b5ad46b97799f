// src/core/tasks/orphan_retry.rs

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::core::client::ClientInner;
use crate::core::errors::LavalinkError;
use crate::core::link::{Link, LinkState};

/// A task that periodically offers orphaned links to the node pool again.
pub struct OrphanRetryTask {
    client: Weak<ClientInner>,
    interval: Duration,
}

impl OrphanRetryTask {
    pub fn new(client: Weak<ClientInner>, interval: Duration) -> Self {
        Self { client, interval }
    }

    /// The main run loop. Exits on shutdown or once the client is dropped.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Orphaned link retry task started.");
        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; nothing can be orphaned yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(client) = self.client.upgrade() else {
                        return;
                    };
                    let links = client.orphaned_links();
                    drop(client);
                    if !links.is_empty() {
                        retry_orphaned_links(&links).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Orphaned link retry task shutting down.");
                    return;
                }
            }
        }
    }
}

/// Retries every orphaned link once and returns how many were rebound.
///
/// Stops early once the pool has no eligible node left; filtered links may still fail
/// individually while others succeed.
pub async fn retry_orphaned_links(links: &[Arc<Link>]) -> usize {
    let mut rebound = 0;
    for link in links {
        if !matches!(link.state(), LinkState::Orphaned { .. }) {
            continue;
        }
        match link.retry_orphaned().await {
            Ok(Some(_)) => rebound += 1,
            Ok(None) => {}
            Err(LavalinkError::NoAvailableNode(reason)) if link.context().region_filter.is_none() => {
                debug!("No node available for orphaned links: {reason}");
                break;
            }
            Err(e) => debug!(guild_id = link.guild_id(), "Orphaned link still unplaceable: {e}"),
        }
    }
    if rebound > 0 {
        info!("Rebound {rebound} orphaned link(s).");
    }
    rebound
}
