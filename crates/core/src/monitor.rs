//! Connectivity state machine with self-adjusting polling.
//!
//! The first cycle runs the launch coordinator; every later cycle is a plain
//! health probe. Results are applied on the interactive loop, and the next
//! poll is not scheduled until that continuation has run, so cycles never
//! overlap. Observers hear about transitions only.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::ClientSettings;
use crate::http::HealthCheck;
use crate::launch::EnsureBackend;
use crate::task::{spawn_background, MainThread};
use crate::types::HealthMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Nothing observed yet; polled like `Disconnected`.
    Unknown,
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub state: Connectivity,
    /// Present on transitions into `Connected` when the backend reported it.
    pub metadata: Option<HealthMetadata>,
}

pub trait ConnectivityObserver: Send + Sync {
    fn connectivity_changed(&self, change: &ConnectivityChange);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTiming {
    pub probe_timeout: Duration,
    pub disconnected_interval: Duration,
    pub connected_interval: Duration,
}

impl MonitorTiming {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            probe_timeout: settings.health_timeout(),
            disconnected_interval: Duration::from_millis(settings.disconnected_poll_ms),
            connected_interval: Duration::from_millis(settings.connected_poll_ms),
        }
    }

    pub fn interval_for(&self, state: Connectivity) -> Duration {
        match state {
            Connectivity::Connected => self.connected_interval,
            Connectivity::Disconnected | Connectivity::Unknown => self.disconnected_interval,
        }
    }
}

struct Snapshot {
    state: Connectivity,
    metadata: Option<HealthMetadata>,
}

struct Shared {
    snapshot: Mutex<Snapshot>,
    observer: Mutex<Option<Arc<dyn ConnectivityObserver>>>,
    recheck: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    /// Runs on the interactive loop only.
    fn apply(&self, next: Connectivity, metadata: Option<HealthMetadata>) -> Connectivity {
        let change = {
            let mut snapshot = lock(&self.snapshot);
            if snapshot.state == next {
                return next;
            }
            log::info!("Backend connectivity: {:?} -> {:?}", snapshot.state, next);
            snapshot.state = next;
            snapshot.metadata = if next.is_connected() { metadata } else { None };
            ConnectivityChange {
                state: next,
                metadata: snapshot.metadata.clone(),
            }
        };

        let observer = lock(&self.observer).clone();
        if let Some(observer) = observer {
            observer.connectivity_changed(&change);
        }
        next
    }
}

pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Start monitoring. Runs `launcher` once, then polls `probe` forever.
    pub fn start<L, H>(
        launcher: L,
        probe: H,
        main: MainThread,
        timing: MonitorTiming,
        observer: Option<Arc<dyn ConnectivityObserver>>,
    ) -> Self
    where
        L: EnsureBackend + 'static,
        H: HealthCheck + 'static,
    {
        let shared = Arc::new(Shared {
            snapshot: Mutex::new(Snapshot {
                state: Connectivity::Unknown,
                metadata: None,
            }),
            observer: Mutex::new(observer),
            recheck: Notify::new(),
        });

        let task = spawn_background(poll_loop(
            launcher,
            probe,
            main,
            timing,
            Arc::clone(&shared),
        ));

        Self { shared, task }
    }

    pub fn state(&self) -> Connectivity {
        lock(&self.shared.snapshot).state
    }

    pub fn metadata(&self) -> Option<HealthMetadata> {
        lock(&self.shared.snapshot).metadata.clone()
    }

    /// Replace the registered observer.
    pub fn set_observer(&self, observer: Option<Arc<dyn ConnectivityObserver>>) {
        *lock(&self.shared.observer) = observer;
    }

    /// Poll as soon as the current cycle allows instead of waiting out the
    /// interval.
    pub fn recheck(&self) {
        self.shared.recheck.notify_one();
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Hand a poll result to the interactive loop and wait for it to be applied.
async fn deliver(
    main: &MainThread,
    shared: &Arc<Shared>,
    observed: Connectivity,
    metadata: Option<HealthMetadata>,
) -> Option<Connectivity> {
    let shared = Arc::clone(shared);
    main.call(move || shared.apply(observed, metadata)).await
}

async fn poll_loop<L, H>(
    launcher: L,
    probe: H,
    main: MainThread,
    timing: MonitorTiming,
    shared: Arc<Shared>,
) where
    L: EnsureBackend,
    H: HealthCheck,
{
    let outcome = launcher.ensure_running().await;
    log::info!("Backend launch: {}", outcome);

    let (observed, metadata) = if outcome.is_running() {
        (
            Connectivity::Connected,
            probe.fetch_metadata(timing.probe_timeout).await,
        )
    } else {
        (Connectivity::Disconnected, None)
    };

    let Some(mut state) = deliver(&main, &shared, observed, metadata).await else {
        return;
    };

    loop {
        tokio::select! {
            _ = tokio::time::sleep(timing.interval_for(state)) => {}
            _ = shared.recheck.notified() => log::debug!("Connectivity recheck requested"),
        }

        let status = probe.probe(timing.probe_timeout).await;
        let observed = if status.is_up() {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        };

        let metadata = if observed.is_connected() && !state.is_connected() {
            probe
                .fetch_metadata(timing.probe_timeout)
                .await
                .or_else(|| status.metadata().cloned())
        } else {
            None
        };

        match deliver(&main, &shared, observed, metadata).await {
            Some(applied) => state = applied,
            None => {
                log::debug!("Interactive loop gone; connectivity monitor exiting");
                return;
            }
        }
    }
}
