// src/core/mod.rs

//! The central module containing the core logic and data structures of the client.

pub mod balancer;
pub mod client;
pub mod errors;
pub mod events;
pub mod link;
pub mod node;
pub mod pool;
pub mod protocol;
pub(crate) mod tasks;

pub use client::LavalinkClient;
pub use errors::LavalinkError;
pub use link::{Link, LinkState};
pub use node::NodeHandle;
