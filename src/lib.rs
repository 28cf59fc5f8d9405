//! sd-model-cache: resident-model cache for a generative image pipeline.
//!
//! Keeps a bounded number of heavyweight diffusion models loaded for
//! fast switching, migrating them between the execution device (hot,
//! limited) and host RAM (warm, larger) instead of reloading from disk
//! on every request. Under slot pressure the least recently used model
//! is fully evicted.
//!
//! Single-threaded by construction: every operation runs to completion
//! on the calling thread, and the façade carries no internal locking.
//! Wrap [`cache::manager::ModelCache`] in a mutex if concurrent callers
//! are ever introduced.

pub mod cache;
pub mod config;
pub mod convert;
pub mod integrity;
pub mod loader;
pub mod registry;
