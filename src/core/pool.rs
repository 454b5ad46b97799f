// src/core/pool.rs

//! The ordered set of registered nodes, shared by the registry and every link.

use crate::core::balancer::{LoadBalancer, SelectionContext};
use crate::core::errors::{LavalinkError, Result};
use crate::core::node::NodeHandle;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Registered nodes in registration order. Order decides ties during selection.
#[derive(Debug)]
pub struct NodePool {
    nodes: RwLock<IndexMap<String, Arc<NodeHandle>>>,
    balancer: Arc<LoadBalancer>,
}

impl NodePool {
    pub fn new(balancer: Arc<LoadBalancer>) -> Self {
        Self {
            nodes: RwLock::new(IndexMap::new()),
            balancer,
        }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Adds a node at the end of the registration order.
    pub fn insert(&self, node: Arc<NodeHandle>) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(node.name()) {
            return Err(LavalinkError::DuplicateNode(node.name().to_string()));
        }
        nodes.insert(node.name().to_string(), node);
        Ok(())
    }

    /// Removes a node, keeping the relative order of the others.
    pub fn remove(&self, name: &str) -> Option<Arc<NodeHandle>> {
        self.nodes.write().shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<NodeHandle>> {
        self.nodes.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.read().contains_key(name)
    }

    /// A point-in-time copy of the pool.
    pub fn snapshot(&self) -> Vec<Arc<NodeHandle>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Selects a node from the current pool.
    pub fn select(&self, ctx: &SelectionContext, exclude: Option<&str>) -> Result<Arc<NodeHandle>> {
        self.balancer.select(&self.snapshot(), ctx, exclude)
    }
}
