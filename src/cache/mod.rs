//! The resident-model cache.
//!
//! - [`residency`]: residency states and the LRU recency queue that
//!   enforces the slot budget
//! - [`manager`]: the [`manager::ModelCache`] façade composing the
//!   registry, the loader adapters, and the tracker

pub mod manager;
pub mod residency;
