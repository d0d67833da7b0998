//! Spies and scripted fakes for the component seams.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::http::HealthCheck;
use crate::launch::{
    CandidateKind, EnsureBackend, LaunchCandidate, LaunchOutcome, Resolve, Spawn,
};
use crate::types::{HealthMetadata, HealthStatus};

pub fn candidate(kind: CandidateKind) -> LaunchCandidate {
    LaunchCandidate {
        program: PathBuf::from(format!("/opt/fake/{:?}", kind).to_lowercase()),
        args: Vec::new(),
        working_dir: None,
        kind,
    }
}

pub fn test_metadata() -> HealthMetadata {
    HealthMetadata {
        provider: "groq".into(),
        model: "llama-3.3-70b-versatile".into(),
        version: "0.1.0".into(),
        available_providers: vec!["groq".into()],
    }
}

/// Health probe answering from a script; the last answer repeats.
#[derive(Clone)]
pub struct ScriptedProbe {
    answers: Arc<Mutex<VecDeque<bool>>>,
    last: Arc<Mutex<bool>>,
    calls: Arc<AtomicUsize>,
    metadata_calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn sequence(answers: Vec<bool>) -> Self {
        Self {
            last: Arc::new(Mutex::new(answers.last().copied().unwrap_or(false))),
            answers: Arc::new(Mutex::new(answers.into())),
            calls: Arc::new(AtomicUsize::new(0)),
            metadata_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always(up: bool) -> Self {
        Self::sequence(vec![up])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    fn next_answer(&self) -> bool {
        let mut answers = self.answers.lock().unwrap();
        match answers.pop_front() {
            Some(up) => {
                *self.last.lock().unwrap() = up;
                up
            }
            None => *self.last.lock().unwrap(),
        }
    }
}

impl HealthCheck for ScriptedProbe {
    async fn probe(&self, _timeout: Duration) -> HealthStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.next_answer() {
            HealthStatus::Up(HealthMetadata::default())
        } else {
            HealthStatus::Down
        }
    }

    async fn fetch_metadata(&self, _timeout: Duration) -> Option<HealthMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Some(test_metadata())
    }
}

/// Spawner spy; results are consumed in order, then every spawn succeeds.
#[derive(Clone)]
pub struct SpySpawner {
    results: Arc<Mutex<VecDeque<bool>>>,
    attempted: Arc<Mutex<Vec<CandidateKind>>>,
}

impl SpySpawner {
    pub fn succeeding() -> Self {
        Self::with_results(Vec::new())
    }

    pub fn with_results(results: Vec<bool>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into())),
            attempted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.attempted.lock().unwrap().len()
    }

    pub fn spawned_kinds(&self) -> Vec<CandidateKind> {
        self.attempted.lock().unwrap().clone()
    }
}

impl Spawn for SpySpawner {
    fn spawn(&self, candidate: &LaunchCandidate) -> bool {
        self.attempted.lock().unwrap().push(candidate.kind);
        self.results.lock().unwrap().pop_front().unwrap_or(true)
    }
}

#[derive(Clone)]
pub struct FixedResolver {
    candidates: Vec<LaunchCandidate>,
    calls: Arc<AtomicUsize>,
}

impl FixedResolver {
    pub fn new(candidates: Vec<LaunchCandidate>) -> Self {
        Self {
            candidates,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolve for FixedResolver {
    fn resolve(&self) -> Vec<LaunchCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.candidates.clone()
    }
}

#[derive(Clone)]
pub struct FixedLauncher {
    outcome: LaunchOutcome,
    calls: Arc<AtomicUsize>,
}

impl FixedLauncher {
    pub fn new(outcome: LaunchOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnsureBackend for FixedLauncher {
    async fn ensure_running(&self) -> LaunchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
    }
}
