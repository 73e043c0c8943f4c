//! Domain models for Nido.
//!
//! These are the core types shared across all crates.

pub mod auth_node;
pub mod community;
pub mod org_unit;
pub mod permission;
pub mod user;
