//! Background re-resolution with change detection.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Shared;
use crate::endpoint::EndpointSet;

/// How the poller decides that a fresh resolution differs from the last
/// published one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Publish when the number of endpoints changes.
    ///
    /// Cheap, but a same-size swap (one instance replaced by another) goes
    /// unnoticed until the count moves.
    #[default]
    Cardinality,
    /// Publish when the set of endpoints changes, ignoring order.
    Membership,
}

impl ChangeDetection {
    pub fn has_changed(self, previous: Option<&EndpointSet>, current: &EndpointSet) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        match self {
            Self::Cardinality => previous.len() != current.len(),
            Self::Membership => !previous.same_members(current),
        }
    }
}

/// Outcome of one poll tick, broadcast to [`Resolver::events`](super::Resolver::events).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// The set changed and was published.
    Published { endpoints: EndpointSet },
    /// The set was resolved but did not differ from the last publish.
    Unchanged { count: usize },
    /// Resolution failed; the last published set stays in effect.
    Failed {
        error_type: &'static str,
        message: String,
    },
    /// The poller exited after cancellation.
    Stopped,
}

/// Periodically re-resolves a service and republishes on change.
pub(crate) struct ChangePoller {
    shared: Arc<Shared>,
    interval: Duration,
    detection: ChangeDetection,
    cancel: CancellationToken,
}

impl ChangePoller {
    pub(crate) fn new(
        shared: Arc<Shared>,
        interval: Duration,
        detection: ChangeDetection,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared,
            interval,
            detection,
            cancel,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            service = %self.shared.service_name(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            detection = ?self.detection,
            "Starting change poller"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Cancellation may interrupt the registry query but never a
            // publish: publishing happens synchronously inside `tick`.
            let event = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,
                event = self.tick() => event,
            };
            self.shared.emit(event);
        }

        self.shared.emit(PollEvent::Stopped);
        info!(service = %self.shared.service_name(), "Change poller stopped");
    }

    async fn tick(&self) -> PollEvent {
        let service = self.shared.service_name();

        match self.shared.resolve_once().await {
            Ok(endpoints) => {
                let previous = self.shared.last_published();
                let previous = previous.as_ref().map(|s| s.endpoints());

                if self.detection.has_changed(previous, &endpoints) {
                    info!(
                        service = %service,
                        previous = previous.map_or(0, EndpointSet::len),
                        current = endpoints.len(),
                        "Endpoint set changed, publishing"
                    );
                    self.shared.publish(endpoints.clone());
                    PollEvent::Published { endpoints }
                } else {
                    debug!(service = %service, endpoints = endpoints.len(), "Endpoint set unchanged");
                    PollEvent::Unchanged {
                        count: endpoints.len(),
                    }
                }
            }
            Err(e) => {
                warn!(
                    service = %service,
                    error = %e,
                    "Poll tick failed, keeping last published endpoints"
                );
                counter!(
                    "waypoint.resolver.poll_failures",
                    "service" => service.to_owned(),
                    "error_type" => e.error_type()
                )
                .increment(1);
                PollEvent::Failed {
                    error_type: e.error_type(),
                    message: e.to_string(),
                }
            }
        }
    }
}
