//! Registry-backed endpoint resolution for RPC channels.
//!
//! A channel asks for `consul://orders`; the [`ResolverFactory`] strips the
//! scheme, resolves the healthy instances of `orders` through a
//! [`RegistryClient`](waypoint_core::RegistryClient), translates each
//! registered control port to its data port, and publishes the result to
//! the channel's listener. A background poller keeps that view current.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use waypoint_resolver::{EndpointSet, ResolverConfig, ResolverFactory};
//! use waypoint_core::LocalRegistry;
//!
//! let registry = Arc::new(LocalRegistry::new());
//! registry.register("orders", "orders-1", "10.0.0.1:8500")?;
//!
//! let factory = ResolverFactory::new(registry, ResolverConfig::default())?;
//! let resolver = factory
//!     .create_with_listener("consul://orders", 50051, |set: &EndpointSet| {
//!         println!("balancer now targets {set}");
//!     })
//!     .await?;
//!
//! // ... later
//! resolver.stop().await;
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod resolver;
pub mod target;

pub use config::{ConfigError, RegistryConfig, ResolverConfig, WaypointConfig};
pub use endpoint::{Endpoint, EndpointSet, EndpointTranslator, MalformedRecordError};
pub use error::{ResolverError, Result};
pub use factory::ResolverFactory;
pub use resolver::{
    ChangeDetection, PollEvent, ResolutionListener, ResolutionSnapshot, Resolver, WatchListener,
};
pub use target::ResolverTarget;
