use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{BackendConfig, Provider};

/// Environment variable naming the project root for the scripted fallback.
pub const PROJECT_ROOT_ENV: &str = "TEXT2MIDI_PROJECT_ROOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_server_exe_stem")]
    pub server_exe_stem: String,
    #[serde(default = "default_install_dir_name")]
    pub install_dir_name: String,
    #[serde(default = "default_script_path")]
    pub script_path: String,
    #[serde(default = "default_root_markers")]
    pub root_markers: Vec<String>,
    #[serde(default = "default_max_walk_levels")]
    pub max_walk_levels: usize,
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    #[serde(default = "default_managed_launcher")]
    pub managed_launcher: String,
    #[serde(default)]
    pub interpreters: Option<Vec<String>>,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    #[serde(default = "default_configure_timeout_ms")]
    pub configure_timeout_ms: u64,
    #[serde(default = "default_generate_timeout_ms")]
    pub generate_timeout_ms: u64,
    #[serde(default = "default_launch_poll_ms")]
    pub launch_poll_ms: u64,
    #[serde(default = "default_launch_budget_ms")]
    pub launch_budget_ms: u64,
    #[serde(default = "default_scripted_launch_budget_ms")]
    pub scripted_launch_budget_ms: u64,
    #[serde(default = "default_disconnected_poll_ms")]
    pub disconnected_poll_ms: u64,
    #[serde(default = "default_connected_poll_ms")]
    pub connected_poll_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:18323".to_string()
}
fn default_server_exe_stem() -> String {
    "text2midi-backend".to_string()
}
fn default_install_dir_name() -> String {
    "text2midi".to_string()
}
fn default_script_path() -> String {
    "vst-plugin/python-backend/server.py".to_string()
}
fn default_root_markers() -> Vec<String> {
    vec!["pyproject.toml".to_string(), "requirements.txt".to_string()]
}
fn default_max_walk_levels() -> usize {
    6
}
fn default_managed_launcher() -> String {
    "uv".to_string()
}
fn default_health_timeout_ms() -> u64 {
    2_000
}
fn default_configure_timeout_ms() -> u64 {
    5_000
}
fn default_generate_timeout_ms() -> u64 {
    60_000
}
fn default_launch_poll_ms() -> u64 {
    500
}
fn default_launch_budget_ms() -> u64 {
    10_000
}
fn default_scripted_launch_budget_ms() -> u64 {
    30_000
}
fn default_disconnected_poll_ms() -> u64 {
    500
}
fn default_connected_poll_ms() -> u64 {
    5_000
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            server_exe_stem: default_server_exe_stem(),
            install_dir_name: default_install_dir_name(),
            script_path: default_script_path(),
            root_markers: default_root_markers(),
            max_walk_levels: default_max_walk_levels(),
            project_root: None,
            managed_launcher: default_managed_launcher(),
            interpreters: None,
            health_timeout_ms: default_health_timeout_ms(),
            configure_timeout_ms: default_configure_timeout_ms(),
            generate_timeout_ms: default_generate_timeout_ms(),
            launch_poll_ms: default_launch_poll_ms(),
            launch_budget_ms: default_launch_budget_ms(),
            scripted_launch_budget_ms: default_scripted_launch_budget_ms(),
            disconnected_poll_ms: default_disconnected_poll_ms(),
            connected_poll_ms: default_connected_poll_ms(),
        }
    }
}

impl ClientSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.configure_timeout_ms)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_millis(self.generate_timeout_ms)
    }

    /// Project root from the settings file, else from the environment.
    pub fn effective_project_root(&self) -> Option<PathBuf> {
        self.project_root.clone().or_else(|| {
            std::env::var_os(PROJECT_ROOT_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
    }
}

const SETTINGS_FILE_NAME: &str = "client-config.json";
const BACKEND_FILE_NAME: &str = "backend-config.json";
const KEYRING_SERVICE: &str = "com.text2midi.client";
const KEYRING_USER: &str = "text2midi-api-key";

/// Save settings to a directory as pretty JSON.
pub fn save_settings(settings: &ClientSettings, dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create config directory: {}", e))?;

    let path = dir.join(SETTINGS_FILE_NAME);
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(&path, json).map_err(|e| format!("Failed to write config file: {}", e))?;

    log::info!("Settings saved to {:?}", path);
    Ok(())
}

/// Load settings from a directory. A missing file yields defaults.
pub fn load_settings(dir: &Path) -> Result<ClientSettings, String> {
    let path = dir.join(SETTINGS_FILE_NAME);

    if !path.exists() {
        return Ok(ClientSettings::default());
    }

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    let settings: ClientSettings = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config file: {}", e))?;

    log::info!("Settings loaded from {:?}", path);
    Ok(settings)
}

/// Last provider selection as persisted by a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBackendConfig {
    pub provider: Provider,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    /// Only written when the OS keyring refused the credential.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

/// Keyring account holding the credential for `provider`.
fn keyring_user(provider: Provider) -> String {
    format!("{}-{}", KEYRING_USER, provider.id())
}

/// Persist a backend config; the credential goes to the OS keyring when possible.
pub fn save_backend_config(config: &BackendConfig, dir: &Path) -> Result<(), String> {
    save_backend_config_in(config, dir, KEYRING_SERVICE)
}

/// Load the persisted backend config, or `None` if nothing was saved yet.
pub fn load_backend_config(dir: &Path) -> Result<Option<BackendConfig>, String> {
    load_backend_config_in(dir, KEYRING_SERVICE)
}

fn save_backend_config_in(
    config: &BackendConfig,
    dir: &Path,
    service: &str,
) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create config directory: {}", e))?;

    let mut stored = StoredBackendConfig {
        provider: config.provider,
        endpoint: config.endpoint.clone().unwrap_or_default(),
        model: config.model.clone().unwrap_or_default(),
        api_key: String::new(),
    };

    match keyring::Entry::new(service, &keyring_user(config.provider)) {
        Ok(entry) if config.api_key.is_empty() => match entry.delete_credential() {
            Ok(()) => log::info!("Cleared {} API key from OS keyring", config.provider),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => log::warn!("Keyring delete failed (non-fatal): {}", e),
        },
        Ok(entry) => {
            if let Err(e) = entry.set_password(&config.api_key) {
                log::warn!("Keyring save failed (non-fatal): {}", e);
                stored.api_key = config.api_key.clone();
            } else {
                log::info!("{} API key saved to OS keyring", config.provider);
            }
        }
        Err(e) => {
            log::warn!("Keyring not available (non-fatal): {}", e);
            stored.api_key = config.api_key.clone();
        }
    }

    let path = dir.join(BACKEND_FILE_NAME);
    let json = serde_json::to_string_pretty(&stored)
        .map_err(|e| format!("Failed to serialize backend config: {}", e))?;
    std::fs::write(&path, json)
        .map_err(|e| format!("Failed to write backend config: {}", e))?;

    log::info!("Backend config saved to {:?}", path);
    Ok(())
}

fn load_backend_config_in(dir: &Path, service: &str) -> Result<Option<BackendConfig>, String> {
    let path = dir.join(BACKEND_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read backend config: {}", e))?;
    let stored: StoredBackendConfig = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse backend config: {}", e))?;

    // Keyring first (this provider's entry only), JSON fallback
    let api_key = match keyring::Entry::new(service, &keyring_user(stored.provider)) {
        Ok(entry) => match entry.get_password() {
            Ok(key) if !key.is_empty() => key,
            _ => stored.api_key.clone(),
        },
        Err(e) => {
            log::warn!("Keyring not available: {}", e);
            stored.api_key.clone()
        }
    };

    Ok(Some(
        BackendConfig::new(stored.provider, api_key)
            .with_endpoint(stored.endpoint)
            .with_model(stored.model),
    ))
}

/// Get the default config directory for CLI usage.
pub fn default_config_dir() -> PathBuf {
    home_config_dir().unwrap_or_else(|| PathBuf::from(".text2midi-client"))
}

fn home_config_dir() -> Option<PathBuf> {
    // ~/.text2midi-client/
    #[cfg(unix)]
    {
        dirs_next::home_dir().map(|h| h.join(".text2midi-client"))
    }
    #[cfg(windows)]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|h| PathBuf::from(h).join("text2midi-client"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(settings.health_timeout(), Duration::from_secs(2));
        assert!(settings.launch_budget_ms > settings.health_timeout_ms);
        assert!(settings.scripted_launch_budget_ms > settings.launch_budget_ms);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{"baseUrl":"http://127.0.0.1:9999","connectedPollMs":1000}"#,
        )
        .unwrap();

        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings.base_url, "http://127.0.0.1:9999");
        assert_eq!(settings.connected_poll_ms, 1000);
        assert_eq!(settings.generate_timeout_ms, 60_000);
        assert_eq!(settings.root_markers, default_root_markers());
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ClientSettings {
            project_root: Some(PathBuf::from("/opt/text2midi")),
            interpreters: Some(vec!["python3.12".into()]),
            ..ClientSettings::default()
        };
        save_settings(&settings, dir.path()).unwrap();
        assert_eq!(load_settings(dir.path()).unwrap(), settings);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE_NAME), "{not json").unwrap();
        let err = load_settings(dir.path()).unwrap_err();
        assert!(err.starts_with("Failed to parse config file"));
    }

    #[test]
    fn explicit_project_root_wins_over_environment() {
        let settings = ClientSettings {
            project_root: Some(PathBuf::from("/srv/t2m")),
            ..ClientSettings::default()
        };
        assert_eq!(
            settings.effective_project_root(),
            Some(PathBuf::from("/srv/t2m"))
        );
    }

    #[test]
    fn no_backend_config_before_first_save() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_backend_config(dir.path()).unwrap(), None);
    }

    struct KeyringCleanup(String);

    impl Drop for KeyringCleanup {
        fn drop(&mut self) {
            for provider in [Provider::Groq, Provider::MiniMax, Provider::OpenAiCompatible] {
                if let Ok(entry) = keyring::Entry::new(&self.0, &keyring_user(provider)) {
                    let _ = entry.delete_credential();
                }
            }
        }
    }

    fn scratch_service() -> KeyringCleanup {
        KeyringCleanup(format!("{}.test-{}", KEYRING_SERVICE, crate::types::new_session_id()))
    }

    #[test]
    fn keyring_entries_are_per_provider() {
        assert_eq!(keyring_user(Provider::Groq), "text2midi-api-key-groq");
        assert_ne!(keyring_user(Provider::Groq), keyring_user(Provider::MiniMax));
    }

    #[test]
    fn nothing_saved_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let service = scratch_service();
        assert_eq!(load_backend_config_in(dir.path(), &service.0).unwrap(), None);
    }

    #[test]
    fn backend_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let service = scratch_service();
        let config = BackendConfig::new(Provider::OpenAiCompatible, "sk-local-123456")
            .with_endpoint("http://localhost:11434/v1")
            .with_model("llama3.2");

        save_backend_config_in(&config, dir.path(), &service.0).unwrap();
        assert_eq!(
            load_backend_config_in(dir.path(), &service.0).unwrap(),
            Some(config)
        );
    }

    #[test]
    fn switching_provider_without_key_does_not_reuse_old_key() {
        let dir = tempfile::tempdir().unwrap();
        let service = scratch_service();

        let groq = BackendConfig::new(Provider::Groq, "gsk_secret_groq_key");
        save_backend_config_in(&groq, dir.path(), &service.0).unwrap();

        let minimax = BackendConfig::new(Provider::MiniMax, "");
        save_backend_config_in(&minimax, dir.path(), &service.0).unwrap();

        let loaded = load_backend_config_in(dir.path(), &service.0)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.provider, Provider::MiniMax);
        assert_eq!(loaded.api_key, "");
    }

    #[test]
    fn clearing_a_key_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let service = scratch_service();

        let first = BackendConfig::new(Provider::Groq, "gsk_first_key_0001");
        save_backend_config_in(&first, dir.path(), &service.0).unwrap();
        let cleared = BackendConfig::new(Provider::Groq, "");
        save_backend_config_in(&cleared, dir.path(), &service.0).unwrap();

        let loaded = load_backend_config_in(dir.path(), &service.0)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.api_key, "");
    }
}
