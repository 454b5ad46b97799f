// src/lib.rs

pub mod config;
pub mod core;

// Re-export
pub use crate::core::balancer::{LoadBalancer, PenaltyProvider, RegionFilter, RegionGroup, SelectionContext};
pub use crate::core::events::{ClientEvent, EventHandler};
pub use crate::core::{LavalinkClient, LavalinkError, Link, LinkState, NodeHandle};
