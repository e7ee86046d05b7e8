//! taskvault-core - persistence layer for the taskvault work-item store.
//!
//! This crate owns the document store, canonical id allocation, the
//! project/task integrity rules, the legacy id migration, and live sync.

pub mod access;
pub mod allocator;
pub mod config;
pub mod core;
pub mod identity;
pub mod ids;
pub mod integrity;
pub mod lease;
pub mod migration;
pub mod model;
pub mod normalize;
pub mod store;
pub mod sync;
