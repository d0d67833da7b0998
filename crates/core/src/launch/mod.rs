//! Backend discovery and startup.

mod coordinator;
mod paths;
mod process;

pub use coordinator::{EnsureBackend, LaunchCoordinator, LaunchOutcome, LaunchTiming};
pub use paths::{CandidateKind, LaunchCandidate, PathResolver, PlatformPaths, Resolve};
pub use process::{ProcessSupervisor, Spawn};
