use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

// ---- Configuration ----

/// LLM provider the backend should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "minimax")]
    MiniMax,
    #[serde(rename = "groq")]
    Groq,
    /// Any OpenAI-compatible endpoint; `endpoint` and `model` are expected.
    #[serde(rename = "openai_custom")]
    OpenAiCompatible,
}

impl Provider {
    pub fn id(self) -> &'static str {
        match self {
            Self::MiniMax => "minimax",
            Self::Groq => "groq",
            Self::OpenAiCompatible => "openai_custom",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "minimax" => Some(Self::MiniMax),
            "groq" => Some(Self::Groq),
            "openai_custom" | "openai" | "custom" => Some(Self::OpenAiCompatible),
            _ => None,
        }
    }

    pub fn needs_endpoint(self) -> bool {
        matches!(self, Self::OpenAiCompatible)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Body of `POST /configure`. Absent endpoint/model travel as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub provider: Provider,
    pub api_key: String,
    #[serde(
        default,
        serialize_with = "none_as_empty",
        deserialize_with = "empty_as_none"
    )]
    pub endpoint: Option<String>,
    #[serde(
        default,
        serialize_with = "none_as_empty",
        deserialize_with = "empty_as_none"
    )]
    pub model: Option<String>,
}

impl BackendConfig {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            endpoint: None,
            model: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into()).filter(|e| !e.is_empty());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into()).filter(|m| !m.is_empty());
        self
    }
}

fn none_as_empty<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(value.as_deref().unwrap_or(""))
}

fn empty_as_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

// ---- Health ----

/// Extended fields of the `/health` body. Missing fields stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMetadata {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub available_providers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Never probed.
    Unknown,
    Up(HealthMetadata),
    /// Probe failed, timed out or reported a non-ready status.
    Down,
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up(_))
    }

    pub fn metadata(&self) -> Option<&HealthMetadata> {
        match self {
            Self::Up(meta) => Some(meta),
            _ => None,
        }
    }
}

// ---- Generation ----

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("prompt is empty")]
    EmptyPrompt,
}

/// One `POST /generate` call. The prompt is trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    prompt: String,
    session_id: String,
}

impl GenerationRequest {
    pub fn new(prompt: &str, session_id: impl Into<String>) -> Result<Self, RequestError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        Ok(Self {
            prompt: prompt.to_string(),
            session_id: session_id.into(),
        })
    }

    /// Build a request with a freshly generated session id.
    pub fn with_new_session(prompt: &str) -> Result<Self, RequestError> {
        Self::new(prompt, new_session_id())
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Short correlation token for backend logs; not a secret.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub instrument: String,
    #[serde(default, deserialize_with = "lenient_whole")]
    pub channel: u8,
    #[serde(default, deserialize_with = "lenient_whole")]
    pub note_count: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub track_type: String,
}

/// Successful `/generate` payload, relayed as received. Fields that are
/// null or of an unexpected type fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    #[serde(default, deserialize_with = "lenient_tracks")]
    pub tracks: Vec<TrackInfo>,
    #[serde(default, deserialize_with = "lenient")]
    pub quality_score: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub genre: String,
    #[serde(default = "default_tempo", deserialize_with = "lenient_tempo")]
    pub tempo: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub midi_path: String,
    #[serde(default, deserialize_with = "lenient_whole")]
    pub bars: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub summary: String,
}

fn default_tempo() -> u32 {
    120
}

fn lenient<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Value::deserialize(d)?;
    Ok(T::deserialize(raw).unwrap_or_default())
}

/// Non-negative number, rounded; `96.0` reads as `96`.
fn whole_number(raw: &Value) -> Option<u64> {
    raw.as_u64().or_else(|| {
        raw.as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64)
    })
}

fn lenient_whole<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    let raw = Value::deserialize(d)?;
    Ok(whole_number(&raw)
        .and_then(|n| T::try_from(n).ok())
        .unwrap_or_default())
}

fn lenient_tempo<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let raw = Value::deserialize(d)?;
    Ok(whole_number(&raw)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|&bpm| bpm > 0)
        .unwrap_or_else(default_tempo))
}

/// Keeps every track entry that is an object; anything else is skipped.
fn lenient_tracks<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<TrackInfo>, D::Error> {
    let raw = Value::deserialize(d)?;
    Ok(raw
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|v| v.is_object())
                .filter_map(|v| TrackInfo::deserialize(v).ok())
                .collect()
        })
        .unwrap_or_default())
}

impl GenerationOutput {
    pub fn total_notes(&self) -> u32 {
        self.tracks.iter().map(|t| t.note_count).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// No parseable response arrived before the deadline.
    Unreachable,
    /// The backend answered and reported an error itself.
    Backend,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
    pub origin: ErrorOrigin,
}

impl GenerationError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: ErrorOrigin::Unreachable,
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: ErrorOrigin::Backend,
        }
    }
}

pub type GenerationResult = Result<GenerationOutput, GenerationError>;
