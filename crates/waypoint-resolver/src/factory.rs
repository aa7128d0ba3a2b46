//! Construction entry point used by channel-creation code.

use std::sync::Arc;

use tracing::{error, info};
use waypoint_core::RegistryClient;

use crate::config::{ConfigError, ResolverConfig};
use crate::error::Result;
use crate::resolver::{ResolutionListener, Resolver};
use crate::target::ResolverTarget;

/// Builds running resolvers for targets under one URI scheme.
///
/// The registry client is shared by every resolver the factory creates.
#[derive(Debug, Clone)]
pub struct ResolverFactory {
    registry: Arc<dyn RegistryClient>,
    config: ResolverConfig,
}

impl ResolverFactory {
    /// Creates a factory after validating `config`.
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        config: ResolverConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    /// The URI scheme this factory serves.
    pub fn name(&self) -> &str {
        &self.config.scheme
    }

    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Parses `address`, resolves it once, publishes, and starts polling.
    ///
    /// # Errors
    ///
    /// Returns the parse or initial resolution error; no resolver is left
    /// running in that case.
    pub async fn create(&self, address: &str, default_port: u16) -> Result<Resolver> {
        let resolver = self.build(address, default_port)?;
        self.start(resolver).await
    }

    /// Like [`create`](Self::create), with `listener` attached before the
    /// initial publish so it observes the first endpoint set.
    pub async fn create_with_listener(
        &self,
        address: &str,
        default_port: u16,
        listener: impl ResolutionListener + 'static,
    ) -> Result<Resolver> {
        let resolver = self.build(address, default_port)?;
        resolver.attach_listener(listener);
        self.start(resolver).await
    }

    fn build(&self, address: &str, default_port: u16) -> Result<Resolver> {
        let target = ResolverTarget::parse(address, &self.config.scheme)?;
        Ok(Resolver::new(
            target,
            default_port,
            Arc::clone(&self.registry),
            &self.config,
        ))
    }

    async fn start(&self, resolver: Resolver) -> Result<Resolver> {
        match resolver.start().await {
            Ok(()) => {
                info!(
                    service = %resolver.service_name(),
                    default_port = resolver.default_port(),
                    "Resolver created"
                );
                Ok(resolver)
            }
            Err(e) => {
                error!(
                    service = %resolver.service_name(),
                    error = %e,
                    error_type = e.error_type(),
                    "Initial resolution failed"
                );
                resolver.stop().await;
                Err(e)
            }
        }
    }
}
