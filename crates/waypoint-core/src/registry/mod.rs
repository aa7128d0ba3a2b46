//! Service registry clients for endpoint discovery.
//!
//! A registry tracks which instances of a service are currently healthy.
//! Resolvers only ever read from it, through [`RegistryClient`], so the same
//! client can be shared across every resolver in the process.

mod cached;
mod consul;
mod local;

use async_trait::async_trait;
use thiserror::Error;

pub use cached::CachedRegistry;
pub use consul::ConsulRegistry;
pub use local::LocalRegistry;

/// Errors that can occur during registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry backend could not be reached or refused the query.
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// The registry did not answer within the allotted time.
    #[error("Registry request timed out")]
    Timeout,

    /// The registry answered with a payload that could not be understood.
    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    /// An instance with this id is already registered for the service.
    #[error("Instance already registered: {0}")]
    AlreadyRegistered(String),

    /// The requested instance was not found.
    #[error("Instance not found: {0}")]
    NotFound(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Read access to a service registry.
///
/// Implementations must be safe for concurrent use by many resolvers.
#[async_trait]
pub trait RegistryClient: Send + Sync + std::fmt::Debug {
    /// Lists the healthy endpoints of a service as raw `host:port` records.
    ///
    /// An unknown service yields an empty list rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] or [`RegistryError::Timeout`]
    /// when the backend cannot be reached.
    async fn list_healthy_endpoints(&self, service: &str) -> Result<Vec<String>>;
}
