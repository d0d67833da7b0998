use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use super::{BackendEndpoint, HEALTH_PATH};
use crate::types::{HealthMetadata, HealthStatus};

/// Liveness check of the backend.
pub trait HealthCheck: Send + Sync {
    /// One bounded GET of the health path.
    fn probe(&self, timeout: Duration) -> impl Future<Output = HealthStatus> + Send;

    /// Re-issue the health call purely for its extended fields.
    fn fetch_metadata(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Option<HealthMetadata>> + Send;
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    endpoint: BackendEndpoint,
}

impl HealthProbe {
    pub fn new(endpoint: BackendEndpoint) -> Self {
        Self { endpoint }
    }
}

fn text_field(body: &Value, key: &str) -> String {
    body[key].as_str().unwrap_or("").to_string()
}

fn parse_metadata(body: &Value) -> HealthMetadata {
    let available_providers = body["available_providers"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    HealthMetadata {
        provider: text_field(body, "provider"),
        model: text_field(body, "model"),
        version: text_field(body, "version"),
        available_providers,
    }
}

/// `Up` only for a JSON body whose `status` is exactly `"ok"`.
fn interpret(body: Option<Value>) -> HealthStatus {
    match body {
        Some(body) if body["status"].as_str() == Some("ok") => {
            HealthStatus::Up(parse_metadata(&body))
        }
        _ => HealthStatus::Down,
    }
}

impl HealthCheck for HealthProbe {
    async fn probe(&self, timeout: Duration) -> HealthStatus {
        let status = interpret(self.endpoint.get_json(HEALTH_PATH, timeout).await);
        log::debug!("Health probe: {}", if status.is_up() { "up" } else { "down" });
        status
    }

    async fn fetch_metadata(&self, timeout: Duration) -> Option<HealthMetadata> {
        let body = self.endpoint.get_json(HEALTH_PATH, timeout).await?;
        body.is_object().then(|| parse_metadata(&body))
    }
}
