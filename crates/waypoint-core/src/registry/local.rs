//! In-memory registry for single-process deployments and tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{RegistryClient, RegistryError, Result};

/// A registered instance of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Instance {
    id: String,
    address: String,
    healthy: bool,
}

/// In-memory service registry.
///
/// Uses a concurrent hash map for thread-safe access without locking.
/// Instances keep their registration order, so listings are stable between
/// calls. The registry can be marked unreachable to exercise outage handling.
#[derive(Debug)]
pub struct LocalRegistry {
    services: DashMap<String, Vec<Instance>>,
    reachable: AtomicBool,
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRegistry {
    /// Creates a new empty local registry.
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }

    /// Registers a healthy instance of `service` reachable at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if an instance with this id is already registered.
    pub fn register(&self, service: &str, instance_id: &str, address: &str) -> Result<()> {
        let mut instances = self.services.entry(service.to_owned()).or_default();

        if instances.iter().any(|i| i.id == instance_id) {
            debug!(service = %service, instance = %instance_id, "Instance already registered");
            return Err(RegistryError::AlreadyRegistered(instance_id.to_owned()));
        }

        info!(service = %service, instance = %instance_id, address = %address, "Instance registered");
        instances.push(Instance {
            id: instance_id.to_owned(),
            address: address.to_owned(),
            healthy: true,
        });
        Ok(())
    }

    /// Removes an instance. Returns silently if it was not registered.
    pub fn deregister(&self, service: &str, instance_id: &str) {
        let removed = self
            .services
            .get_mut(service)
            .map(|mut instances| {
                let before = instances.len();
                instances.retain(|i| i.id != instance_id);
                before != instances.len()
            })
            .unwrap_or(false);

        if removed {
            info!(service = %service, instance = %instance_id, "Instance deregistered");
        } else {
            debug!(service = %service, instance = %instance_id, "Instance not found for deregistration");
        }
    }

    /// Marks an instance healthy or unhealthy.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the instance is not registered.
    pub fn set_health(&self, service: &str, instance_id: &str, healthy: bool) -> Result<()> {
        let mut instances = self
            .services
            .get_mut(service)
            .ok_or_else(|| RegistryError::NotFound(instance_id.to_owned()))?;

        let instance = instances
            .iter_mut()
            .find(|i| i.id == instance_id)
            .ok_or_else(|| RegistryError::NotFound(instance_id.to_owned()))?;

        instance.healthy = healthy;
        debug!(service = %service, instance = %instance_id, healthy, "Instance health updated");
        Ok(())
    }

    /// Simulates the backend becoming reachable or unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns the number of services with at least one registered instance.
    pub fn len(&self) -> usize {
        self.services.iter().filter(|s| !s.is_empty()).count()
    }

    /// Returns true if no instances are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RegistryClient for LocalRegistry {
    async fn list_healthy_endpoints(&self, service: &str) -> Result<Vec<String>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable(
                "local registry marked unreachable".to_owned(),
            ));
        }

        Ok(self
            .services
            .get(service)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|i| i.healthy)
                    .map(|i| i.address.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_list() {
        let registry = LocalRegistry::new();
        registry.register("orders", "a", "10.0.0.1:8500").unwrap();
        registry.register("orders", "b", "10.0.0.2:8500").unwrap();

        let found = registry.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(found, vec!["10.0.0.1:8500", "10.0.0.2:8500"]);
    }

    #[tokio::test]
    async fn unknown_service_is_empty() {
        let registry = LocalRegistry::new();

        let found = registry.list_healthy_endpoints("nonexistent").await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = LocalRegistry::new();
        registry.register("orders", "a", "10.0.0.1:8500").unwrap();

        let result = registry.register("orders", "a", "10.0.0.9:8500");
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn unhealthy_instances_are_hidden() {
        let registry = LocalRegistry::new();
        registry.register("orders", "a", "10.0.0.1:8500").unwrap();
        registry.register("orders", "b", "10.0.0.2:8500").unwrap();

        registry.set_health("orders", "a", false).unwrap();
        let found = registry.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(found, vec!["10.0.0.2:8500"]);

        registry.set_health("orders", "a", true).unwrap();
        let found = registry.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn set_health_on_missing_instance_fails() {
        let registry = LocalRegistry::new();
        assert!(matches!(
            registry.set_health("orders", "ghost", false),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deregister_removes_instance() {
        let registry = LocalRegistry::new();
        registry.register("orders", "a", "10.0.0.1:8500").unwrap();
        assert!(!registry.is_empty());

        registry.deregister("orders", "a");
        assert!(registry.is_empty());

        // Should not panic
        registry.deregister("orders", "a");
    }

    #[tokio::test]
    async fn unreachable_registry_fails() {
        let registry = LocalRegistry::new();
        registry.register("orders", "a", "10.0.0.1:8500").unwrap();
        registry.set_reachable(false);

        let result = registry.list_healthy_endpoints("orders").await;
        assert!(matches!(result, Err(RegistryError::Unavailable(_))));

        registry.set_reachable(true);
        assert!(registry.list_healthy_endpoints("orders").await.is_ok());
    }
}
