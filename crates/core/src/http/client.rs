use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use super::{BackendEndpoint, CONFIGURE_PATH, GENERATE_PATH};
use crate::system::mask_credential;
use crate::types::{
    BackendConfig, GenerationError, GenerationOutput, GenerationRequest, GenerationResult,
};

/// One-shot configure/generate calls. Retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct RequestClient {
    endpoint: BackendEndpoint,
}

impl RequestClient {
    pub fn new(endpoint: BackendEndpoint) -> Self {
        Self { endpoint }
    }

    /// Forward provider settings. `true` only when the backend answers
    /// `status: "configured"`. The credential is sent as-is, even if empty.
    pub async fn configure(&self, config: &BackendConfig, timeout: Duration) -> bool {
        log::info!(
            "Configuring backend: provider={}, key={}",
            config.provider,
            mask_credential(&config.api_key)
        );

        let Some((_, body)) = self.endpoint.post_json(CONFIGURE_PATH, config, timeout).await
        else {
            return false;
        };

        let configured = body["status"].as_str() == Some("configured");
        if !configured {
            log::warn!("Backend rejected configuration: {}", body);
        }
        configured
    }

    pub async fn generate(&self, request: &GenerationRequest, timeout: Duration) -> GenerationResult {
        log::info!("Generating (session {})", request.session_id());

        let response = self.endpoint.post_json(GENERATE_PATH, request, timeout).await;
        interpret_generation(response)
    }
}

fn error_message(body: &Value) -> String {
    let field = body
        .get("detail")
        .filter(|v| !v.is_null())
        .or_else(|| body.get("error").filter(|v| !v.is_null()));
    match field {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "Unknown error".to_string(),
    }
}

fn interpret_generation(response: Option<(StatusCode, Value)>) -> GenerationResult {
    let Some((status, body)) = response else {
        return Err(GenerationError::unreachable("Server unreachable"));
    };

    if body["status"].as_str() == Some("error") || !status.is_success() {
        let err = GenerationError::backend(error_message(&body));
        log::warn!("Backend reported generation error ({}): {}", status, err);
        return Err(err);
    }

    if !body.is_object() {
        log::warn!("Unexpected generation payload: {}", body);
        return Err(GenerationError::unreachable(
            "Malformed response from backend: expected a JSON object",
        ));
    }

    // Field-level oddities fall back to defaults inside GenerationOutput
    serde_json::from_value::<GenerationOutput>(body).map_err(|e| {
        log::warn!("Unexpected generation payload: {}", e);
        GenerationError::unreachable(format!("Malformed response from backend: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorOrigin, Provider};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn client_for(base: &str) -> RequestClient {
        RequestClient::new(BackendEndpoint::new(base).unwrap())
    }

    fn unused_local_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    #[tokio::test]
    async fn generate_relays_the_success_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/generate")
                    .json_body_partial(r#"{"prompt": "dreamy jazz with piano and soft drums"}"#);
                then.status(200).json_body(json!({
                    "status": "ok",
                    "tracks": [{ "channel": 0, "instrument": "piano", "note_count": 42 }],
                    "quality_score": 0.87,
                    "genre": "jazz",
                    "tempo": 96,
                    "midi_path": "/tmp/out.mid",
                }));
            })
            .await;

        let request = GenerationRequest::new("dreamy jazz with piano and soft drums", "a1b2c3d4")
            .unwrap();
        let output = client_for(&server.base_url())
            .generate(&request, TIMEOUT)
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(output.tracks.len(), 1);
        assert_eq!(output.tracks[0].note_count, 42);
        assert_eq!(output.tracks[0].instrument, "piano");
        assert_eq!(output.quality_score, 0.87);
        assert_eq!(output.genre, "jazz");
        assert_eq!(output.tempo, 96);
        assert_eq!(output.midi_path, "/tmp/out.mid");
    }

    #[tokio::test]
    async fn generate_sends_prompt_and_session_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/generate")
                    .json_body(json!({ "prompt": "techno", "session_id": "deadbeef" }));
                then.status(200).json_body(json!({ "status": "completed" }));
            })
            .await;

        let request = GenerationRequest::new("  techno  ", "deadbeef").unwrap();
        let output = client_for(&server.base_url()).generate(&request, TIMEOUT).await;
        mock.assert_async().await;
        assert!(output.unwrap().tracks.is_empty());
    }

    #[tokio::test]
    async fn generate_against_unreachable_host_is_tagged_unreachable() {
        let timeout = Duration::from_millis(500);
        let request = GenerationRequest::new("ambient pads", "s1").unwrap();

        let started = Instant::now();
        let err = client_for(&unused_local_url())
            .generate(&request, timeout)
            .await
            .unwrap_err();

        assert_eq!(err.origin, ErrorOrigin::Unreachable);
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn generate_timeout_is_tagged_unreachable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200)
                    .delay(Duration::from_secs(5))
                    .json_body(json!({ "status": "ok" }));
            })
            .await;

        let timeout = Duration::from_millis(300);
        let request = GenerationRequest::new("slow", "s2").unwrap();
        let started = Instant::now();
        let err = client_for(&server.base_url())
            .generate(&request, timeout)
            .await
            .unwrap_err();

        assert_eq!(err.origin, ErrorOrigin::Unreachable);
        assert!(started.elapsed() < timeout + Duration::from_millis(700));
    }

    #[tokio::test]
    async fn backend_error_payload_is_tagged_backend() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200)
                    .json_body(json!({ "status": "error", "error": "LLM quota exceeded" }));
            })
            .await;

        let request = GenerationRequest::new("metal", "s3").unwrap();
        let err = client_for(&server.base_url())
            .generate(&request, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.origin, ErrorOrigin::Backend);
        assert_eq!(err.message, "LLM quota exceeded");
    }

    #[tokio::test]
    async fn http_error_with_detail_is_tagged_backend() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(503).json_body(json!({
                    "detail": "No LLM provider configured. Call POST /configure first."
                }));
            })
            .await;

        let request = GenerationRequest::new("funk", "s4").unwrap();
        let err = client_for(&server.base_url())
            .generate(&request, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.origin, ErrorOrigin::Backend);
        assert!(err.message.starts_with("No LLM provider configured"));
    }

    #[tokio::test]
    async fn unparseable_body_is_tagged_unreachable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200).body("Internal Server Error");
            })
            .await;

        let request = GenerationRequest::new("house", "s5").unwrap();
        let err = client_for(&server.base_url())
            .generate(&request, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.origin, ErrorOrigin::Unreachable);
    }

    #[tokio::test]
    async fn null_fields_in_a_success_payload_are_relayed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200).json_body(json!({
                    "status": "completed",
                    "tracks": [{ "channel": 0, "instrument": "piano", "note_count": 42 }],
                    "quality_score": 0.87,
                    "genre": null,
                    "tempo": 96.0,
                    "midi_path": null,
                }));
            })
            .await;

        let request = GenerationRequest::new("ambient pads", "0badf00d").unwrap();
        let output = client_for(&server.base_url())
            .generate(&request, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(output.total_notes(), 42);
        assert_eq!(output.quality_score, 0.87);
        assert_eq!(output.genre, "");
        assert_eq!(output.tempo, 96);
        assert_eq!(output.midi_path, "");
    }

    #[tokio::test]
    async fn non_object_body_is_tagged_unreachable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200).json_body(json!([1, 2, 3]));
            })
            .await;

        let request = GenerationRequest::new("anything", "12345678").unwrap();
        let err = client_for(&server.base_url())
            .generate(&request, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.origin, ErrorOrigin::Unreachable);
    }

    #[tokio::test]
    async fn configure_round_trips_all_four_fields() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/configure").json_body(json!({
                    "provider": "groq",
                    "api_key": "k123",
                    "endpoint": "",
                    "model": "",
                }));
                then.status(200)
                    .json_body(json!({ "status": "configured", "provider": "groq" }));
            })
            .await;

        let config = BackendConfig::new(Provider::Groq, "k123");
        assert!(client_for(&server.base_url()).configure(&config, TIMEOUT).await);
        mock.assert_async().await;

        let received: BackendConfig = serde_json::from_value(json!({
            "provider": "groq",
            "api_key": "k123",
            "endpoint": "",
            "model": "",
        }))
        .unwrap();
        assert_eq!(received, config);
    }

    #[tokio::test]
    async fn configure_with_empty_credential_still_calls_backend() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/configure")
                    .json_body_partial(r#"{"api_key": ""}"#);
                then.status(200).json_body(json!({ "status": "configured" }));
            })
            .await;

        let config = BackendConfig::new(Provider::MiniMax, "");
        assert!(client_for(&server.base_url()).configure(&config, TIMEOUT).await);
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn configure_fails_on_other_status_or_no_backend() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/configure");
                then.status(200).json_body(json!({ "status": "invalid_provider" }));
            })
            .await;

        let config = BackendConfig::new(Provider::Groq, "k");
        assert!(!client_for(&server.base_url()).configure(&config, TIMEOUT).await);
        assert!(
            !client_for(&unused_local_url())
                .configure(&config, Duration::from_millis(300))
                .await
        );
    }

    #[test]
    fn error_message_prefers_detail_then_error() {
        assert_eq!(error_message(&json!({"detail": "a", "error": "b"})), "a");
        assert_eq!(error_message(&json!({"error": "b"})), "b");
        assert_eq!(error_message(&json!({"status": "error"})), "Unknown error");
        assert_eq!(
            error_message(&json!({"detail": [{"msg": "field required"}]})),
            r#"[{"msg":"field required"}]"#
        );
    }
}
