//! Core shared types for fogmesh
//!
//! This crate contains the data model shared by every fogmesh component:
//! node tiers and the capabilities they imply, and the records persisted in
//! the ledger-backed registry.

mod models;

pub use models::{ApplicationRecord, Capabilities, NodeRecord, Tier};
