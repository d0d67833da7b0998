use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::paths::{LaunchCandidate, Resolve};
use super::process::Spawn;
use crate::config::ClientSettings;
use crate::http::HealthCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    AlreadyRunning,
    Launched,
    /// No candidate resolved, or none could be spawned.
    NotFound,
    /// Spawned, but never reported healthy within the launch budget.
    FailedToStart,
}

impl LaunchOutcome {
    pub fn is_running(self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::Launched)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::AlreadyRunning => "Server already running",
            Self::Launched => "Server launched successfully",
            Self::NotFound => "Server executable not found",
            Self::FailedToStart => "Server failed to start",
        }
    }
}

impl std::fmt::Display for LaunchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// "Make sure the backend is up", as seen by the connectivity monitor.
pub trait EnsureBackend: Send + Sync {
    fn ensure_running(&self) -> impl Future<Output = LaunchOutcome> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTiming {
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    /// Budget for a native executable to answer healthy.
    pub executable_budget: Duration,
    /// Budget for interpreter / managed-launcher startup.
    pub scripted_budget: Duration,
}

impl LaunchTiming {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            probe_timeout: settings.health_timeout(),
            poll_interval: Duration::from_millis(settings.launch_poll_ms),
            executable_budget: Duration::from_millis(settings.launch_budget_ms),
            scripted_budget: Duration::from_millis(settings.scripted_launch_budget_ms),
        }
    }

    fn budget_for(&self, candidate: &LaunchCandidate) -> Duration {
        if candidate.is_scripted() {
            self.scripted_budget
        } else {
            self.executable_budget
        }
    }
}

/// Probe, resolve, spawn, then wait for health within the launch budget.
///
/// [`ensure_running`](EnsureBackend::ensure_running) blocks for up to the
/// launch budget and must not be invoked concurrently for the same backend.
pub struct LaunchCoordinator<H, S, R> {
    probe: H,
    spawner: S,
    resolver: R,
    timing: LaunchTiming,
}

impl<H, S, R> LaunchCoordinator<H, S, R>
where
    H: HealthCheck,
    S: Spawn,
    R: Resolve,
{
    pub fn new(probe: H, spawner: S, resolver: R, timing: LaunchTiming) -> Self {
        Self {
            probe,
            spawner,
            resolver,
            timing,
        }
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    async fn wait_healthy(&self, budget: Duration) -> bool {
        let started = Instant::now();
        loop {
            tokio::time::sleep(self.timing.poll_interval).await;

            if self.probe.probe(self.timing.probe_timeout).await.is_up() {
                log::info!("Backend healthy after {:?}", started.elapsed());
                return true;
            }
            if started.elapsed() >= budget {
                return false;
            }
        }
    }
}

impl<H, S, R> EnsureBackend for LaunchCoordinator<H, S, R>
where
    H: HealthCheck,
    S: Spawn,
    R: Resolve,
{
    async fn ensure_running(&self) -> LaunchOutcome {
        if self.probe.probe(self.timing.probe_timeout).await.is_up() {
            log::info!("Backend already running");
            return LaunchOutcome::AlreadyRunning;
        }

        let candidates = self.resolver.resolve();
        let Some(spawned) = candidates.iter().find(|c| self.spawner.spawn(c)) else {
            if candidates.is_empty() {
                log::warn!("No backend executable or script found");
            } else {
                log::warn!(
                    "All {} backend launch candidate(s) failed to spawn",
                    candidates.len()
                );
            }
            return LaunchOutcome::NotFound;
        };

        let budget = self.timing.budget_for(spawned);
        log::info!(
            "Waiting up to {:?} for backend ({:?}) to become healthy",
            budget,
            spawned.kind
        );

        if self.wait_healthy(budget).await {
            LaunchOutcome::Launched
        } else {
            log::warn!("Backend did not become healthy within {:?}", budget);
            LaunchOutcome::FailedToStart
        }
    }
}
