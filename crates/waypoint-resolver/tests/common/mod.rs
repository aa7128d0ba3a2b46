//! Common test utilities for resolver integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use waypoint_core::{RegistryClient, RegistryError};
use waypoint_resolver::{
    ChangeDetection, Endpoint, EndpointSet, ResolutionListener, ResolverConfig, ResolverFactory,
};

type Response = Result<Vec<String>, RegistryError>;

/// Registry that plays back a fixed sequence of responses.
///
/// Once the script is exhausted the final response repeats.
#[derive(Debug)]
pub struct ScriptedRegistry {
    script: Mutex<VecDeque<Response>>,
    last: Mutex<Option<Response>>,
    calls: AtomicUsize,
}

impl ScriptedRegistry {
    pub fn new(script: impl IntoIterator<Item = Response>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of lookups served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for ScriptedRegistry {
    async fn list_healthy_endpoints(&self, _service: &str) -> waypoint_core::Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(response) = next {
            *last = Some(response);
        }
        last.clone()
            .unwrap_or_else(|| Err(RegistryError::Unavailable("empty script".into())))
    }
}

/// Registry that answers the first lookup and never completes later ones.
#[derive(Debug)]
pub struct StallingRegistry {
    first: Vec<String>,
    calls: AtomicUsize,
}

impl StallingRegistry {
    pub fn new(records: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            first: records.iter().map(|r| (*r).to_owned()).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for StallingRegistry {
    async fn list_healthy_endpoints(&self, _service: &str) -> waypoint_core::Result<Vec<String>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(self.first.clone());
        }
        std::future::pending().await
    }
}

/// A successful registry answer.
pub fn ok(records: &[&str]) -> Response {
    Ok(records.iter().map(|r| (*r).to_owned()).collect())
}

/// A failed registry answer.
pub fn unavailable() -> Response {
    Err(RegistryError::Unavailable("connection refused".into()))
}

/// The endpoint set expected for `hosts` on data port 8501.
pub fn on_8501(hosts: &[&str]) -> EndpointSet {
    hosts.iter().map(|h| Endpoint::new(*h, 8501).unwrap()).collect()
}

pub fn factory(registry: Arc<dyn RegistryClient>) -> ResolverFactory {
    ResolverFactory::new(registry, ResolverConfig::default()).unwrap()
}

pub fn factory_with_detection(
    registry: Arc<dyn RegistryClient>,
    detection: ChangeDetection,
) -> ResolverFactory {
    let config = ResolverConfig {
        change_detection: detection,
        ..ResolverConfig::default()
    };
    ResolverFactory::new(registry, config).unwrap()
}

/// Everything a listener has been handed, in order.
#[derive(Debug, Clone, Default)]
pub struct Published(Arc<Mutex<Vec<EndpointSet>>>);

impl Published {
    pub fn listener(&self) -> impl ResolutionListener + 'static {
        let sink = Arc::clone(&self.0);
        move |set: &EndpointSet| sink.lock().unwrap().push(set.clone())
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<EndpointSet> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<EndpointSet> {
        self.0.lock().unwrap().last().cloned()
    }
}
