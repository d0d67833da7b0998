//! UI-facing entry point: configure and generate without blocking the
//! interactive loop, plus the wiring that starts a real monitor.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::ClientSettings;
use crate::http::{BackendEndpoint, HealthProbe, RequestClient};
use crate::launch::{LaunchCoordinator, LaunchTiming, PathResolver, ProcessSupervisor};
use crate::monitor::{ConnectivityMonitor, ConnectivityObserver, MonitorTiming};
use crate::task::{spawn_background, MainThread};
use crate::types::{BackendConfig, GenerationRequest, GenerationResult, RequestError};

pub trait ConfigureObserver: Send + Sync {
    fn configure_done(&self, success: bool);
}

pub trait GenerationObserver: Send + Sync {
    /// Receives the result by value; the session keeps no copy.
    fn generation_done(&self, result: GenerationResult);
}

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct BackendSession {
    client: RequestClient,
    main: MainThread,
    configure_timeout: Duration,
    generate_timeout: Duration,
    configure_observer: Slot<dyn ConfigureObserver>,
    generation_observer: Slot<dyn GenerationObserver>,
}

impl BackendSession {
    pub fn new(client: RequestClient, main: MainThread, settings: &ClientSettings) -> Self {
        Self {
            client,
            main,
            configure_timeout: settings.configure_timeout(),
            generate_timeout: settings.generate_timeout(),
            configure_observer: Arc::new(Mutex::new(None)),
            generation_observer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn client(&self) -> &RequestClient {
        &self.client
    }

    pub fn set_configure_observer(&self, observer: Option<Arc<dyn ConfigureObserver>>) {
        *lock(&self.configure_observer) = observer;
    }

    pub fn set_generation_observer(&self, observer: Option<Arc<dyn GenerationObserver>>) {
        *lock(&self.generation_observer) = observer;
    }

    /// Forward `config` in the background; the configure observer hears the
    /// outcome on the interactive loop.
    pub fn configure(&self, config: BackendConfig) -> JoinHandle<()> {
        let client = self.client.clone();
        let main = self.main.clone();
        let slot = Arc::clone(&self.configure_observer);
        let timeout = self.configure_timeout;

        spawn_background(async move {
            let success = client.configure(&config, timeout).await;
            main.post(move || {
                let observer = lock(&slot).clone();
                if let Some(observer) = observer {
                    observer.configure_done(success);
                }
            });
        })
    }

    /// Start a generation for `prompt` under a fresh session id. Blank
    /// prompts are rejected before any request is made.
    pub fn generate(&self, prompt: &str) -> Result<JoinHandle<()>, RequestError> {
        let request = GenerationRequest::with_new_session(prompt)?;
        let client = self.client.clone();
        let main = self.main.clone();
        let slot = Arc::clone(&self.generation_observer);
        let timeout = self.generate_timeout;

        Ok(spawn_background(async move {
            let result = client.generate(&request, timeout).await;
            main.post(move || {
                let observer = lock(&slot).clone();
                if let Some(observer) = observer {
                    observer.generation_done(result);
                }
            });
        }))
    }
}

/// A running orchestrator: connectivity monitor plus request session.
pub struct Backend {
    pub monitor: ConnectivityMonitor,
    pub session: BackendSession,
    supervisor: ProcessSupervisor,
}

impl Backend {
    /// Wire the real resolver, supervisor, probe and client and start
    /// monitoring (which launches the backend if needed).
    pub fn start(
        settings: &ClientSettings,
        main: MainThread,
        observer: Option<Arc<dyn ConnectivityObserver>>,
    ) -> Result<Self, String> {
        let endpoint = BackendEndpoint::new(&settings.base_url)?;
        let supervisor = ProcessSupervisor::new();

        let coordinator = LaunchCoordinator::new(
            HealthProbe::new(endpoint.clone()),
            supervisor.clone(),
            PathResolver::from_environment(settings),
            LaunchTiming::from_settings(settings),
        );

        let monitor = ConnectivityMonitor::start(
            coordinator,
            HealthProbe::new(endpoint.clone()),
            main.clone(),
            MonitorTiming::from_settings(settings),
            observer,
        );
        let session = BackendSession::new(RequestClient::new(endpoint), main, settings);

        Ok(Self {
            monitor,
            session,
            supervisor,
        })
    }

    /// PID of the backend this client spawned, if it spawned one.
    pub fn spawned_pid(&self) -> Option<u32> {
        self.supervisor.last_pid()
    }
}
