//! Registry boundary for Waypoint.
//!
//! This crate provides the registry side of endpoint resolution:
//!
//! - **Registry**: the [`RegistryClient`] seam the resolver queries for healthy
//!   `host:port` records, plus an in-memory [`LocalRegistry`], a TTL
//!   [`CachedRegistry`] decorator and a [`ConsulRegistry`] HTTP client.

pub mod registry;

pub use registry::{
    CachedRegistry, ConsulRegistry, LocalRegistry, RegistryClient, RegistryError, Result,
};
