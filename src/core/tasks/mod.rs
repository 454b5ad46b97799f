// src/core/tasks/mod.rs

//! Long-running background tasks that support the client, such as the
//! periodic retry of orphaned links.

pub mod orphan_retry;
