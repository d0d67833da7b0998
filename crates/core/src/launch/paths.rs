//! Locating a runnable backend: native executable first, then a scripted
//! fallback through a managed launcher or a plain interpreter.
//!
//! Resolution only tests for file presence; nothing is executed here.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::ClientSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Compiled backend, launched without arguments.
    Executable,
    /// Environment manager running the backend script (e.g. `uv run`).
    ManagedLauncher,
    /// Interpreter invoked directly on the backend script.
    Interpreter,
}

/// A resolved command eligible for launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCandidate {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub kind: CandidateKind,
}

impl LaunchCandidate {
    pub fn is_scripted(&self) -> bool {
        self.kind != CandidateKind::Executable
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

pub trait Resolve: Send + Sync {
    /// Candidates in launch priority order. Never fails; may be empty.
    fn resolve(&self) -> Vec<LaunchCandidate>;
}

/// Platform-specific search locations, selected once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformPaths {
    Windows {
        program_files: PathBuf,
        home: Option<PathBuf>,
    },
    MacOs {
        home: Option<PathBuf>,
    },
    Linux {
        home: Option<PathBuf>,
    },
}

impl PlatformPaths {
    pub fn detect() -> Self {
        let home = dirs_next::home_dir();
        if cfg!(windows) {
            let program_files = std::env::var_os("ProgramFiles")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"));
            Self::Windows {
                program_files,
                home,
            }
        } else if cfg!(target_os = "macos") {
            Self::MacOs { home }
        } else {
            Self::Linux { home }
        }
    }

    fn home(&self) -> Option<&Path> {
        match self {
            Self::Windows { home, .. } | Self::MacOs { home } | Self::Linux { home } => {
                home.as_deref()
            }
        }
    }

    /// File names to look for when searching for `stem` as a program.
    pub fn executable_names(&self, stem: &str) -> Vec<String> {
        match self {
            Self::Windows { .. } if stem.to_ascii_lowercase().ends_with(".exe") => {
                vec![stem.to_string()]
            }
            Self::Windows { .. } => vec![format!("{}.exe", stem), stem.to_string()],
            _ => vec![stem.to_string()],
        }
    }

    /// Well-known install directories for the compiled backend.
    pub fn install_dirs(&self, dir_name: &str) -> Vec<PathBuf> {
        match self {
            Self::Windows { program_files, .. } => vec![program_files.join(dir_name)],
            Self::MacOs { home } => home
                .iter()
                .map(|h| h.join("Library").join("Application Support").join(dir_name))
                .collect(),
            Self::Linux { home } => home
                .iter()
                .flat_map(|h| {
                    [
                        h.join(".local").join("share").join(dir_name),
                        h.join(".local").join("lib").join(dir_name),
                    ]
                })
                .collect(),
        }
    }

    /// Project roots to try when walking up from the client finds nothing.
    pub fn fallback_roots(&self, dir_name: &str) -> Vec<PathBuf> {
        self.home()
            .map(|h| vec![h.join(dir_name), h.join("Documents").join(dir_name)])
            .unwrap_or_default()
    }

    pub fn default_interpreters(&self) -> &'static [&'static str] {
        match self {
            Self::Windows { .. } => &["python", "py", "python3"],
            _ => &["python3", "python"],
        }
    }
}

pub struct PathResolver {
    platform: PlatformPaths,
    client_dir: Option<PathBuf>,
    search_path: Vec<PathBuf>,
    exe_stem: String,
    install_dir_name: String,
    script_path: PathBuf,
    root_markers: Vec<String>,
    max_walk_levels: usize,
    project_root: Option<PathBuf>,
    managed_launcher: String,
    interpreters: Vec<String>,
}

impl PathResolver {
    /// Resolver for a given platform with no client directory and an empty
    /// search path; see [`PathResolver::from_environment`] for the real one.
    pub fn new(platform: PlatformPaths, settings: &ClientSettings) -> Self {
        let interpreters = settings.interpreters.clone().unwrap_or_else(|| {
            platform
                .default_interpreters()
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

        Self {
            platform,
            client_dir: None,
            search_path: Vec::new(),
            exe_stem: settings.server_exe_stem.clone(),
            install_dir_name: settings.install_dir_name.clone(),
            script_path: PathBuf::from(&settings.script_path),
            root_markers: settings.root_markers.clone(),
            max_walk_levels: settings.max_walk_levels,
            project_root: settings.effective_project_root(),
            managed_launcher: settings.managed_launcher.clone(),
            interpreters,
        }
    }

    /// Resolver bound to this process: its own binary's directory and `PATH`.
    pub fn from_environment(settings: &ClientSettings) -> Self {
        let client_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        Self::new(PlatformPaths::detect(), settings)
            .with_client_dir(client_dir)
            .with_search_path_var(std::env::var_os("PATH"))
    }

    pub fn with_client_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.client_dir = dir;
        self
    }

    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = dirs;
        self
    }

    pub fn with_search_path_var(self, var: Option<OsString>) -> Self {
        let dirs = var
            .map(|v| std::env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default();
        self.with_search_path(dirs)
    }

    fn find_in_dir(&self, dir: &Path, stem: &str) -> Option<PathBuf> {
        self.platform
            .executable_names(stem)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }

    /// First `PATH` entry holding `stem`, in listed order.
    fn find_on_path(&self, stem: &str) -> Option<PathBuf> {
        self.search_path
            .iter()
            .find_map(|dir| self.find_in_dir(dir, stem))
    }

    fn adjacent_executable(&self) -> Option<PathBuf> {
        let dir = self.client_dir.as_deref()?;
        self.find_in_dir(dir, &self.exe_stem)
    }

    fn installed_executable(&self) -> Option<PathBuf> {
        self.platform
            .install_dirs(&self.install_dir_name)
            .iter()
            .find_map(|dir| self.find_in_dir(dir, &self.exe_stem))
    }

    fn has_marker(&self, dir: &Path) -> bool {
        self.root_markers.iter().any(|m| dir.join(m).is_file())
    }

    /// Project root for the scripted fallback: explicit root, then a bounded
    /// walk up from the client directory, then the platform's usual places.
    pub fn find_project_root(&self) -> Option<PathBuf> {
        if let Some(root) = &self.project_root {
            if root.is_dir() {
                return Some(root.clone());
            }
            log::warn!("Configured project root {} does not exist", root.display());
        }

        if let Some(start) = self.client_dir.as_deref() {
            let mut dir = Some(start);
            for _ in 0..=self.max_walk_levels {
                let Some(current) = dir else { break };
                if self.has_marker(current) {
                    return Some(current.to_path_buf());
                }
                dir = current.parent();
            }
        }

        self.platform
            .fallback_roots(&self.install_dir_name)
            .into_iter()
            .find(|root| self.has_marker(root))
    }

    fn scripted_candidates(&self) -> Vec<LaunchCandidate> {
        let Some(root) = self.find_project_root() else {
            log::debug!("No project root found for scripted fallback");
            return Vec::new();
        };

        let script = root.join(&self.script_path);
        if !script.is_file() {
            log::debug!("Backend script missing: {}", script.display());
            return Vec::new();
        }
        let script_arg = script.to_string_lossy().to_string();

        let mut found = Vec::new();

        if !self.managed_launcher.is_empty() {
            if let Some(launcher) = self.find_on_path(&self.managed_launcher) {
                found.push(LaunchCandidate {
                    program: launcher,
                    args: vec!["run".into(), script_arg.clone()],
                    working_dir: Some(root.clone()),
                    kind: CandidateKind::ManagedLauncher,
                });
            }
        }

        if let Some(interpreter) = self
            .interpreters
            .iter()
            .find_map(|name| self.find_on_path(name))
        {
            found.push(LaunchCandidate {
                program: interpreter,
                args: vec![script_arg],
                working_dir: Some(root),
                kind: CandidateKind::Interpreter,
            });
        }

        found
    }
}

impl Resolve for PathResolver {
    fn resolve(&self) -> Vec<LaunchCandidate> {
        let executables = [
            self.adjacent_executable(),
            self.installed_executable(),
            self.find_on_path(&self.exe_stem),
        ];

        let mut candidates: Vec<LaunchCandidate> = executables
            .into_iter()
            .flatten()
            .map(|program| LaunchCandidate {
                working_dir: program.parent().map(Path::to_path_buf),
                program,
                args: Vec::new(),
                kind: CandidateKind::Executable,
            })
            .collect();
        candidates.extend(self.scripted_candidates());

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert((c.program.clone(), c.args.clone())));

        for c in &candidates {
            log::debug!("Launch candidate ({:?}): {}", c.kind, c.command_line());
        }
        log::info!("Resolved {} backend launch candidate(s)", candidates.len());
        candidates
    }
}
