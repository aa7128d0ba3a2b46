//! Publish targets for resolved endpoint sets.

use tokio::sync::watch;

use crate::endpoint::EndpointSet;

/// Receives every endpoint set a resolver publishes.
///
/// Called synchronously from `publish`, never concurrently with itself for
/// the same resolver. Implementations must not call back into that resolver's
/// `publish` or `refresh`.
pub trait ResolutionListener: Send + Sync {
    fn on_resolved(&self, endpoints: &EndpointSet);
}

impl<F> ResolutionListener for F
where
    F: Fn(&EndpointSet) + Send + Sync,
{
    fn on_resolved(&self, endpoints: &EndpointSet) {
        self(endpoints);
    }
}

/// Listener that forwards published sets into a [`watch`] channel.
///
/// Lets an async balancer await membership updates instead of being called
/// back on the resolver's task.
#[derive(Debug)]
pub struct WatchListener {
    tx: watch::Sender<EndpointSet>,
}

impl WatchListener {
    /// Creates the listener and the receiving half handed to the balancer.
    pub fn channel() -> (Self, watch::Receiver<EndpointSet>) {
        let (tx, rx) = watch::channel(EndpointSet::default());
        (Self { tx }, rx)
    }
}

impl ResolutionListener for WatchListener {
    fn on_resolved(&self, endpoints: &EndpointSet) {
        self.tx.send_replace(endpoints.clone());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;

    #[tokio::test]
    async fn watch_listener_forwards_sets() {
        let (listener, mut rx) = WatchListener::channel();
        assert!(rx.borrow().is_empty());

        let set = EndpointSet::new(vec![Endpoint::new("10.0.0.1", 8501).unwrap()]);
        listener.on_resolved(&set);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), set);
    }

    #[test]
    fn closures_are_listeners() {
        let seen = std::sync::Mutex::new(Vec::new());
        let listener = |set: &EndpointSet| seen.lock().unwrap().push(set.len());

        listener.on_resolved(&EndpointSet::default());
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }
}
