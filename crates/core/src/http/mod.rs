//! HTTP access to the local backend: health probing and the two request
//! operations. Every call carries its own timeout and never retries.

mod client;
mod health;

pub use client::RequestClient;
pub use health::{HealthCheck, HealthProbe};

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

pub const HEALTH_PATH: &str = "/health";
pub const CONFIGURE_PATH: &str = "/configure";
pub const GENERATE_PATH: &str = "/generate";

/// Base URL plus a pooled HTTP client, shared by probe and request client.
#[derive(Debug, Clone)]
pub struct BackendEndpoint {
    client: reqwest::Client,
    base: Url,
}

impl BackendEndpoint {
    pub fn new(base_url: &str) -> Result<Self, String> {
        let base =
            Url::parse(base_url).map_err(|e| format!("Invalid backend URL {}: {}", base_url, e))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("HTTP client error: {}", e))?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Option<Url> {
        self.base.join(path).ok()
    }

    /// GET `path` and parse the body as JSON. `None` on any failure.
    async fn get_json(&self, path: &str, timeout: Duration) -> Option<serde_json::Value> {
        let url = self.url(path)?;
        let resp = match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::debug!("GET {} failed: {}", path, e);
                return None;
            }
        };
        resp.json::<serde_json::Value>().await.ok()
    }

    /// POST a JSON body to `path`. `None` when nothing parseable came back
    /// before the deadline.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Option<(StatusCode, serde_json::Value)> {
        let url = self.url(path)?;
        let resp = match self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("POST {} failed: {}", path, e);
                return None;
            }
        };

        let status = resp.status();
        match resp.json::<serde_json::Value>().await {
            Ok(json) => Some((status, json)),
            Err(e) => {
                log::warn!("POST {} returned an unparseable body: {}", path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_join_onto_the_base() {
        let endpoint = BackendEndpoint::new("http://127.0.0.1:18323").unwrap();
        assert_eq!(
            endpoint.url(HEALTH_PATH).unwrap().as_str(),
            "http://127.0.0.1:18323/health"
        );
        assert_eq!(
            endpoint.url(GENERATE_PATH).unwrap().as_str(),
            "http://127.0.0.1:18323/generate"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = BackendEndpoint::new("not a url").unwrap_err();
        assert!(err.starts_with("Invalid backend URL"));
    }
}
