//! Recognition client: one HTTP call per captured frame, no retries.
//!
//! A failed attempt is displayed and the next capture starts a new one.

use async_trait::async_trait;
use faceport_core::{AttemptResult, CapturedFrame, EmployeeRef, Failure, RecognitionOutcome};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const RECOGNIZE_PATH: &str = "/recognition/recognize";

/// Submits a frame and reports the terminal result. Never panics, never errors.
#[async_trait]
pub trait RecognitionClient: Send + Sync {
    async fn submit(&self, frame: CapturedFrame) -> AttemptResult;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., `http://localhost:8000/api/v1`).
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as the `device_id` form field when set.
    pub device_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Wire form of the recognition response.
///
/// The server's `success` flag is ignored: `access_granted` alone decides
/// the outcome, and a denial is a successful call.
#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    access_granted: bool,
    #[serde(default)]
    employee: Option<EmployeeRef>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    liveness_details: Option<serde_json::Value>,
}

impl From<RecognitionResponse> for RecognitionOutcome {
    fn from(r: RecognitionResponse) -> Self {
        Self {
            access_granted: r.access_granted,
            employee: r.employee,
            confidence: r
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0)),
            message: r.message,
            server_timestamp: r.timestamp,
            liveness: r.liveness_details,
        }
    }
}

/// Error body of a non-2xx answer; `detail` may be a string or a list.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn server_message(self) -> Option<String> {
        match self.detail {
            Some(serde_json::Value::String(s)) => Some(s),
            _ => self.message,
        }
    }
}

/// HTTP client for the recognition endpoint.
#[derive(Debug)]
pub struct HttpRecognitionClient {
    client: reqwest::Client,
    endpoint: String,
    device_id: Option<String>,
    timeout: Duration,
}

impl HttpRecognitionClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let endpoint = format!("{}{RECOGNIZE_PATH}", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            device_id: config.device_id,
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn transport_failure(&self, e: reqwest::Error) -> Failure {
        if e.is_timeout() {
            Failure::timeout(format!(
                "no response within {} ms",
                self.timeout.as_millis()
            ))
        } else {
            Failure::network(e.to_string())
        }
    }

    async fn call(&self, frame: CapturedFrame) -> Result<RecognitionOutcome, Failure> {
        let image = Part::bytes(frame.jpeg)
            .file_name("face.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Failure::network(format!("failed to build multipart body: {e}")))?;
        let mut form = Form::new().part("image", image);
        if let Some(id) = &self.device_id {
            form = form.text("device_id", id.clone());
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_failure(e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.transport_failure(e))?;

        if !status.is_success() {
            let server_message = serde_json::from_slice::<ErrorBody>(&body)
                .unwrap_or_default()
                .server_message();
            return Err(Failure::server(
                format!("HTTP {status}: {}", String::from_utf8_lossy(&body)),
                server_message,
            ));
        }

        let parsed: RecognitionResponse = serde_json::from_slice(&body)
            .map_err(|e| Failure::server(format!("malformed response: {e}"), None))?;
        Ok(parsed.into())
    }
}

#[async_trait]
impl RecognitionClient for HttpRecognitionClient {
    async fn submit(&self, frame: CapturedFrame) -> AttemptResult {
        tracing::debug!(endpoint = %self.endpoint, jpeg_bytes = frame.jpeg.len(), "submitting frame");
        match self.call(frame).await {
            Ok(outcome) => AttemptResult::Succeeded(outcome),
            Err(failure) => AttemptResult::Failed(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceport_core::FailureKind;
    use std::time::Instant;
    use wiremock::matchers::{body_string_contains, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Kept ASCII so the multipart body can be matched as a string.
    fn frame() -> CapturedFrame {
        CapturedFrame {
            jpeg: b"jpeg-bytes".to_vec(),
            width: 640,
            height: 480,
            captured_at: Instant::now(),
        }
    }

    fn client(server: &MockServer, timeout: Duration) -> HttpRecognitionClient {
        HttpRecognitionClient::new(ClientConfig {
            base_url: format!("{}/api/v1/", server.uri()),
            timeout,
            device_id: Some("kiosk-test".into()),
        })
        .expect("client build")
    }

    #[tokio::test]
    async fn test_granted_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/recognition/recognize"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .and(body_string_contains("filename=\"face.jpg\""))
            .and(body_string_contains("kiosk-test"))
            .and(body_string_contains("jpeg-bytes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "access_granted": true,
                "employee": {"id": 7, "name": "Ana", "department": "Ops"},
                "confidence": 0.93,
                "message": "Good morning, Ana!",
                "timestamp": "2026-10-19T09:00:00"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5)).submit(frame()).await;
        let AttemptResult::Succeeded(outcome) = result else {
            panic!("expected success, got {result:?}");
        };
        assert!(outcome.access_granted);
        assert_eq!(outcome.employee.as_ref().map(|e| e.name.as_str()), Some("Ana"));
        assert_eq!(outcome.confidence, Some(0.93));
        assert_eq!(outcome.server_timestamp.as_deref(), Some("2026-10-19T09:00:00"));
    }

    #[tokio::test]
    async fn test_denied_response_is_still_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/recognition/recognize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "access_granted": false,
                "message": "Face not recognized",
                "liveness_details": {"is_live": false, "reason": "screen"}
            })))
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5)).submit(frame()).await;
        let AttemptResult::Succeeded(outcome) = result else {
            panic!("expected success, got {result:?}");
        };
        assert!(!outcome.access_granted);
        assert_eq!(outcome.message, "Face not recognized");
        assert!(outcome.liveness.is_some());
    }

    #[tokio::test]
    async fn test_access_granted_decides_over_success_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "access_granted": true,
                "message": "Welcome"
            })))
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5)).submit(frame()).await;
        assert!(result.is_granted());
    }

    #[tokio::test]
    async fn test_server_error_uses_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "detail": "No employees registered"
            })))
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5)).submit(frame()).await;
        let AttemptResult::Failed(failure) = result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(failure.kind, FailureKind::Server);
        assert_eq!(failure.display_message(), "No employees registered");
        assert!(failure.detail.starts_with("HTTP 404"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_server_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5)).submit(frame()).await;
        assert!(matches!(
            result,
            AttemptResult::Failed(Failure { kind: FailureKind::Server, server_message: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_granted": true, "message": ""}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_millis(200)).submit(frame()).await;
        assert!(matches!(
            result,
            AttemptResult::Failed(Failure { kind: FailureKind::Timeout, .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let client = HttpRecognitionClient::new(ClientConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(5),
            device_id: None,
        })
        .unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/recognition/recognize");

        let result = client.submit(frame()).await;
        assert!(matches!(
            result,
            AttemptResult::Failed(Failure { kind: FailureKind::Network, .. })
        ));
    }
}
