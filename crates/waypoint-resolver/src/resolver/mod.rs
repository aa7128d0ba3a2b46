//! Endpoint resolution for a single registry-backed service.
//!
//! A [`Resolver`] is bound to one service name. It answers "what endpoints
//! exist right now" on demand, publishes results to at most one listener,
//! and runs a background poller that republishes when membership changes.
//!
//! Resolvers are built by [`ResolverFactory`](crate::ResolverFactory), which
//! performs the initial resolution and starts the poller.

mod listener;
mod poller;

pub use listener::{ResolutionListener, WatchListener};
pub use poller::{ChangeDetection, PollEvent};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypoint_core::{RegistryClient, RegistryError};

use crate::config::ResolverConfig;
use crate::endpoint::{EndpointSet, EndpointTranslator};
use crate::error::{ResolverError, Result};
use crate::target::ResolverTarget;

use poller::ChangePoller;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The last endpoint set a resolver published.
///
/// Snapshots are immutable; each publish replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionSnapshot {
    endpoints: EndpointSet,
    generation: u64,
}

impl ResolutionSnapshot {
    pub const fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Number of endpoints, the fingerprint used for change detection.
    pub fn cardinality(&self) -> usize {
        self.endpoints.len()
    }

    /// 1 for the first publish, incremented on every publish after it.
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// State shared between a resolver handle and its poller task.
pub(crate) struct Shared {
    target: ResolverTarget,
    translator: EndpointTranslator,
    resolve_timeout: Duration,
    registry: RwLock<Option<Arc<dyn RegistryClient>>>,
    listener: RwLock<Option<Arc<dyn ResolutionListener>>>,
    publish_lock: Mutex<()>,
    snapshot: watch::Sender<Option<Arc<ResolutionSnapshot>>>,
    events: broadcast::Sender<PollEvent>,
}

impl Shared {
    pub(crate) fn service_name(&self) -> &str {
        self.target.service_name()
    }

    pub(crate) async fn resolve_once(&self) -> Result<EndpointSet> {
        let registry = self.registry.read().clone().ok_or(ResolverError::Stopped)?;
        let service = self.target.service_name();

        let records = tokio::time::timeout(
            self.resolve_timeout,
            registry.list_healthy_endpoints(service),
        )
        .await
        .unwrap_or(Err(RegistryError::Timeout))
        .map_err(|source| ResolverError::RegistryUnavailable {
            service: service.to_owned(),
            source,
        })?;

        let endpoints = self.translator.translate(&records)?;
        debug!(service = %service, endpoints = endpoints.len(), "Resolved endpoints");
        Ok(endpoints)
    }

    pub(crate) fn publish(&self, endpoints: EndpointSet) {
        let _guard = self.publish_lock.lock();

        let generation = self
            .snapshot
            .borrow()
            .as_ref()
            .map_or(1, |previous| previous.generation + 1);
        let snapshot = Arc::new(ResolutionSnapshot {
            endpoints,
            generation,
        });
        self.snapshot.send_replace(Some(Arc::clone(&snapshot)));

        let listener = self.listener.read().clone();
        match listener {
            Some(listener) => {
                listener.on_resolved(&snapshot.endpoints);
                counter!("waypoint.resolver.publishes", "service" => self.service_name().to_owned())
                    .increment(1);
                debug!(
                    service = %self.service_name(),
                    endpoints = snapshot.cardinality(),
                    generation,
                    "Published endpoints"
                );
            }
            None => {
                debug!(service = %self.service_name(), "No listener attached, publish not delivered");
            }
        }
    }

    pub(crate) fn last_published(&self) -> Option<Arc<ResolutionSnapshot>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn emit(&self, event: PollEvent) {
        // No subscribers is the common case.
        let _ = self.events.send(event);
    }
}

/// Resolves one service and keeps its listener up to date.
pub struct Resolver {
    shared: Arc<Shared>,
    default_port: u16,
    poll_interval: Duration,
    change_detection: ChangeDetection,
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("target", &self.shared.target)
            .field("default_port", &self.default_port)
            .field("poll_interval", &self.poll_interval)
            .field("change_detection", &self.change_detection)
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub(crate) fn new(
        target: ResolverTarget,
        default_port: u16,
        registry: Arc<dyn RegistryClient>,
        config: &ResolverConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                target,
                translator: EndpointTranslator::new(config.port_offset),
                resolve_timeout: config.resolve_timeout,
                registry: RwLock::new(Some(registry)),
                listener: RwLock::new(None),
                publish_lock: Mutex::new(()),
                snapshot,
                events,
            }),
            default_port,
            poll_interval: config.poll_interval,
            change_detection: config.change_detection,
            cancel: CancellationToken::new(),
            poller: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &ResolverTarget {
        &self.shared.target
    }

    pub fn service_name(&self) -> &str {
        self.shared.service_name()
    }

    /// Port the owning channel asked for; registry records carry their own.
    pub const fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Queries the registry and translates the answer. Does not publish.
    ///
    /// # Errors
    ///
    /// Fails with [`ResolverError::RegistryUnavailable`] when the registry
    /// errors or exceeds the resolve timeout, with
    /// [`ResolverError::MalformedRecord`] when any record is malformed, and
    /// with [`ResolverError::Stopped`] after [`stop`](Self::stop).
    pub async fn resolve_once(&self) -> Result<EndpointSet> {
        self.shared.resolve_once().await
    }

    /// Delivers `endpoints` to the attached listener and records them as the
    /// last published set.
    ///
    /// Without a listener this only updates the snapshot.
    pub fn publish(&self, endpoints: EndpointSet) {
        self.shared.publish(endpoints);
    }

    /// Resolves and publishes in one step, for channel-driven refreshes.
    ///
    /// On failure nothing is published and the previous set stays in effect.
    pub async fn refresh(&self) -> Result<EndpointSet> {
        let endpoints = self.shared.resolve_once().await?;
        self.shared.publish(endpoints.clone());
        Ok(endpoints)
    }

    /// Sets the publish target, replacing any previous one.
    pub fn attach_listener(&self, listener: impl ResolutionListener + 'static) {
        *self.shared.listener.write() = Some(Arc::new(listener));
        debug!(service = %self.service_name(), "Listener attached");
    }

    pub fn detach_listener(&self) {
        self.shared.listener.write().take();
    }

    pub fn last_published(&self) -> Option<Arc<ResolutionSnapshot>> {
        self.shared.last_published()
    }

    /// Watches the last published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ResolutionSnapshot>>> {
        self.shared.snapshot.subscribe()
    }

    /// Poller outcomes, including tick failures.
    pub fn events(&self) -> broadcast::Receiver<PollEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Performs the initial resolution and publish, then starts the poller.
    pub(crate) async fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ResolverError::Stopped);
        }

        let endpoints = self.shared.resolve_once().await?;
        info!(
            target_uri = %self.shared.target,
            endpoints = endpoints.len(),
            "Initial resolution complete"
        );
        self.shared.publish(endpoints);

        let poller = ChangePoller::new(
            Arc::clone(&self.shared),
            self.poll_interval,
            self.change_detection,
            self.cancel.clone(),
        );
        *self.poller.lock() = Some(poller.spawn());
        Ok(())
    }

    /// Cancels the poller, waits for it to finish and releases the registry.
    ///
    /// A publish already running completes; none follow. Calling this again
    /// is a no-op.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.poller.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(service = %self.service_name(), error = %e, "Change poller ended abnormally");
            }
            info!(target_uri = %self.shared.target, "Resolver stopped");
        }

        self.shared.registry.write().take();
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
