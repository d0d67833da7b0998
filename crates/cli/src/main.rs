use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use text2midi_client_core as core;

use text2midi_client_core::config::ClientSettings;
use text2midi_client_core::http::{BackendEndpoint, HealthCheck, HealthProbe, RequestClient};
use text2midi_client_core::launch::{
    EnsureBackend, LaunchCoordinator, LaunchOutcome, LaunchTiming, PathResolver,
    ProcessSupervisor, Resolve,
};
use text2midi_client_core::monitor::{Connectivity, ConnectivityChange, ConnectivityObserver};
use text2midi_client_core::session::{Backend, BackendSession, ConfigureObserver, GenerationObserver};
use text2midi_client_core::types::{BackendConfig, GenerationResult, HealthStatus, Provider};

const PID_FILE_NAME: &str = "backend.pid";

#[derive(Parser)]
#[command(
    name = "text2midi-client",
    about = "Locate, launch and talk to the local text2midi backend"
)]
enum Cli {
    /// List backend launch candidates in the order they would be tried
    Resolve {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Make sure the backend is running, launching it if needed
    Launch {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Probe backend health
    Status {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Send provider settings to the backend
    Configure {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// minimax, groq or openai_custom (default: last saved)
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        /// Endpoint URL for an OpenAI-compatible provider
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Remember these settings for later runs
        #[arg(long)]
        save: bool,
    },

    /// Generate MIDI from a text prompt
    Generate {
        #[arg(short, long)]
        config: Option<PathBuf>,

        prompt: String,
    },

    /// Keep the backend up and report connectivity changes until Ctrl+C
    Watch {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Stop a backend launched by this client (via PID file)
    Stop {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let result = match Cli::parse() {
        Cli::Resolve { config } => cmd_resolve(config),
        Cli::Launch { config } => cmd_launch(config).await,
        Cli::Status { config } => cmd_status(config).await,
        Cli::Configure {
            config,
            provider,
            api_key,
            endpoint,
            model,
            save,
        } => cmd_configure(config, provider, api_key, endpoint, model, save).await,
        Cli::Generate { config, prompt } => cmd_generate(config, prompt).await,
        Cli::Watch { config } => cmd_watch(config).await,
        Cli::Stop { config } => cmd_stop(config),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn config_dir_for(config_path: &Option<PathBuf>) -> PathBuf {
    config_path
        .as_ref()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(core::config::default_config_dir)
}

fn load(config_path: &Option<PathBuf>) -> Result<(PathBuf, ClientSettings), String> {
    let config_dir = config_dir_for(config_path);
    let settings = core::config::load_settings(&config_dir)?;
    Ok((config_dir, settings))
}

fn remember_pid(config_dir: &std::path::Path, pid: Option<u32>) {
    if let Some(pid) = pid {
        let pid_file = config_dir.join(PID_FILE_NAME);
        if let Err(e) = core::system::write_pid_file(&pid_file, pid) {
            log::warn!("{}", e);
        }
    }
}

fn cmd_resolve(config_path: Option<PathBuf>) -> Result<(), String> {
    let (_, settings) = load(&config_path)?;
    let resolver = PathResolver::from_environment(&settings);

    let candidates = resolver.resolve();
    if candidates.is_empty() {
        println!("No backend executable or script found.");
        if let Some(root) = resolver.find_project_root() {
            println!("Project root: {}", root.display());
        } else {
            println!(
                "Set {} to the project root to enable the scripted fallback.",
                core::config::PROJECT_ROOT_ENV
            );
        }
        return Ok(());
    }

    for (i, c) in candidates.iter().enumerate() {
        println!("{}. [{:?}] {}", i + 1, c.kind, c.command_line());
    }
    Ok(())
}

async fn cmd_launch(config_path: Option<PathBuf>) -> Result<(), String> {
    let (config_dir, settings) = load(&config_path)?;
    let endpoint = BackendEndpoint::new(&settings.base_url)?;

    let coordinator = LaunchCoordinator::new(
        HealthProbe::new(endpoint),
        ProcessSupervisor::new(),
        PathResolver::from_environment(&settings),
        LaunchTiming::from_settings(&settings),
    );

    let outcome = coordinator.ensure_running().await;
    println!("{}", outcome);

    if outcome == LaunchOutcome::Launched {
        remember_pid(&config_dir, coordinator.spawner().last_pid());
    }
    if outcome.is_running() {
        Ok(())
    } else {
        Err(format!("Backend is not running: {}", outcome))
    }
}

async fn cmd_status(config_path: Option<PathBuf>) -> Result<(), String> {
    let (config_dir, settings) = load(&config_path)?;
    let probe = HealthProbe::new(BackendEndpoint::new(&settings.base_url)?);

    match probe.probe(settings.health_timeout()).await {
        HealthStatus::Up(meta) => {
            println!("Status: connected ({})", settings.base_url);
            let meta = probe
                .fetch_metadata(settings.health_timeout())
                .await
                .unwrap_or(meta);
            if !meta.version.is_empty() {
                println!("Version: {}", meta.version);
            }
            if !meta.provider.is_empty() {
                println!("Provider: {}", meta.provider);
            }
            if !meta.model.is_empty() {
                println!("Model: {}", meta.model);
            }
            if !meta.available_providers.is_empty() {
                println!("Available providers: {}", meta.available_providers.join(", "));
            }
        }
        HealthStatus::Down | HealthStatus::Unknown => {
            println!("Status: disconnected ({} unreachable)", settings.base_url);

            let pid_file = config_dir.join(PID_FILE_NAME);
            if let Ok(pid) = core::system::read_pid_file(&pid_file) {
                println!(
                    "Stale PID file found: {}. Run `text2midi-client stop` to clean up.",
                    pid
                );
            }
        }
    }
    Ok(())
}

/// Prints session results as they land on the interactive loop.
#[derive(Default)]
struct Console {
    configured: AtomicBool,
}

impl ConnectivityObserver for Console {
    fn connectivity_changed(&self, change: &ConnectivityChange) {
        match (&change.state, &change.metadata) {
            (Connectivity::Connected, Some(meta)) if !meta.provider.is_empty() => {
                println!("Connected (provider: {}, model: {})", meta.provider, meta.model)
            }
            (Connectivity::Connected, _) => println!("Connected"),
            (Connectivity::Disconnected, _) => println!("Disconnected"),
            (Connectivity::Unknown, _) => {}
        }
    }
}

impl ConfigureObserver for Console {
    fn configure_done(&self, success: bool) {
        if success {
            println!("Backend configured.");
        } else {
            println!("Backend configuration failed.");
        }
        self.configured.store(success, Ordering::SeqCst);
    }
}

impl GenerationObserver for Console {
    fn generation_done(&self, result: GenerationResult) {
        match result {
            Ok(out) => {
                println!(
                    "Generated {} track(s), {} notes, quality {:.2}",
                    out.tracks.len(),
                    out.total_notes(),
                    out.quality_score
                );
                if !out.genre.is_empty() {
                    println!("Genre: {} @ {} BPM", out.genre, out.tempo);
                }
                for t in &out.tracks {
                    let label = if t.name.is_empty() { &t.instrument } else { &t.name };
                    println!("  ch{:>2} {:<16} {} notes", t.channel, label, t.note_count);
                }
                if !out.summary.is_empty() {
                    println!("{}", out.summary);
                }
                if !out.midi_path.is_empty() {
                    println!("MIDI: {}", out.midi_path);
                }
            }
            Err(e) => println!("Generation failed ({:?}): {}", e.origin, e),
        }
    }
}

fn backend_config_from_args(
    config_dir: &std::path::Path,
    provider: Option<String>,
    api_key: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
) -> Result<BackendConfig, String> {
    let stored = core::config::load_backend_config(config_dir)?;

    let provider = match provider {
        Some(id) => Provider::from_id(&id).ok_or_else(|| format!("Unknown provider: {}", id))?,
        None => stored
            .as_ref()
            .map(|c| c.provider)
            .ok_or("No provider given and none saved. Pass --provider.")?,
    };

    // Fall back to saved values only for the same provider
    let saved = stored.filter(|c| c.provider == provider);
    let api_key = api_key
        .or_else(|| saved.as_ref().map(|c| c.api_key.clone()))
        .unwrap_or_default();
    let endpoint = endpoint.or_else(|| saved.as_ref().and_then(|c| c.endpoint.clone()));
    let model = model.or_else(|| saved.as_ref().and_then(|c| c.model.clone()));

    if api_key.is_empty() {
        log::warn!("No API key given for {}", provider);
    }
    if provider.needs_endpoint() && endpoint.is_none() {
        log::warn!("{} usually needs --endpoint", provider);
    }

    Ok(BackendConfig::new(provider, api_key)
        .with_endpoint(endpoint.unwrap_or_default())
        .with_model(model.unwrap_or_default()))
}

async fn cmd_configure(
    config_path: Option<PathBuf>,
    provider: Option<String>,
    api_key: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    save: bool,
) -> Result<(), String> {
    let (config_dir, settings) = load(&config_path)?;
    let backend_config = backend_config_from_args(&config_dir, provider, api_key, endpoint, model)?;

    if save {
        core::config::save_backend_config(&backend_config, &config_dir)?;
    }

    let (main, mut main_loop) = core::task::main_thread();
    let session = BackendSession::new(
        RequestClient::new(BackendEndpoint::new(&settings.base_url)?),
        main,
        &settings,
    );
    let console = Arc::new(Console::default());
    session.set_configure_observer(Some(console.clone()));

    session
        .configure(backend_config)
        .await
        .map_err(|e| format!("Configure task failed: {}", e))?;
    main_loop.run_pending();

    if console.configured.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err("Backend did not accept the configuration".into())
    }
}

async fn cmd_generate(config_path: Option<PathBuf>, prompt: String) -> Result<(), String> {
    let (_, settings) = load(&config_path)?;

    let (main, mut main_loop) = core::task::main_thread();
    let session = BackendSession::new(
        RequestClient::new(BackendEndpoint::new(&settings.base_url)?),
        main,
        &settings,
    );
    session.set_generation_observer(Some(Arc::new(Console::default())));

    log::info!("Generating (timeout {:?})...", settings.generate_timeout());
    session
        .generate(&prompt)
        .map_err(|e| e.to_string())?
        .await
        .map_err(|e| format!("Generation task failed: {}", e))?;
    main_loop.run_pending();
    Ok(())
}

async fn cmd_watch(config_path: Option<PathBuf>) -> Result<(), String> {
    let (config_dir, settings) = load(&config_path)?;
    let stored = core::config::load_backend_config(&config_dir)?;

    let (main, mut main_loop) = core::task::main_thread();
    let console = Arc::new(Console::default());
    let backend = Backend::start(&settings, main, Some(console.clone()))?;
    backend.session.set_configure_observer(Some(console.clone()));

    log::info!("Watching {}. Press Ctrl+C to stop.", settings.base_url);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("Failed to set Ctrl+C handler: {}", e))?;

    let mut pending_config = stored;
    let mut pid_written = false;
    let mut rechecked = false;

    loop {
        tokio::select! {
            ran = main_loop.run_next() => {
                if !ran {
                    break;
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        if !pid_written {
            if let Some(pid) = backend.spawned_pid() {
                remember_pid(&config_dir, Some(pid));
                pid_written = true;
            }
        }

        // Push saved provider settings once the backend is reachable
        if backend.monitor.state() == Connectivity::Connected {
            if let Some(config) = pending_config.take() {
                let _ = backend.session.configure(config);
            }
        }
        if !rechecked && console.configured.load(Ordering::SeqCst) {
            backend.monitor.recheck();
            rechecked = true;
        }
    }

    log::info!("Shutting down...");
    backend.monitor.stop();
    if let Some(pid) = backend.spawned_pid() {
        println!(
            "Backend left running (PID {}). Run `text2midi-client stop` to stop it.",
            pid
        );
    }
    Ok(())
}

fn cmd_stop(config_path: Option<PathBuf>) -> Result<(), String> {
    let config_dir = config_dir_for(&config_path);
    let pid_file = config_dir.join(PID_FILE_NAME);

    if !pid_file.exists() {
        return Err("No PID file found. Backend may not have been launched by this client.".into());
    }

    let pid = core::system::read_pid_file(&pid_file)?;
    log::info!("Stopping backend PID: {}", pid);
    core::system::kill_pid(pid);

    let _ = std::fs::remove_file(&pid_file);
    log::info!("Backend stopped.");
    Ok(())
}
