//! DeepFace HTTP client
//!
//! Talks to a DeepFace API server (`deepface api` / `POST /analyze`). The image
//! is sent inline as a base64 data URI so the server does not need access to
//! the asset store.

use super::classifier::{AttributeClassifier, AttributeResult, ClassifyError};
use base64::Engine;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "bpc-gi/0.1.0";

/// Request body of `POST /analyze`
#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    img_path: String,
    actions: [&'a str; 1],
    enforce_detection: bool,
}

/// DeepFace HTTP classifier
pub struct DeepFaceHttpClassifier {
    client: reqwest::Client,
    analyze_url: String,
    enforce_detection: bool,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl DeepFaceHttpClassifier {
    /// Create a client for the server at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - Server root, e.g. `http://127.0.0.1:5005`
    /// * `request_timeout` - Transport timeout per request
    /// * `requests_per_second` - Optional client-side rate limit
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        requests_per_second: Option<u32>,
    ) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClassifyError::Request(format!("Failed to build HTTP client: {}", e)))?;

        let rate_limiter = requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            analyze_url: format!("{}/analyze", base_url.trim_end_matches('/')),
            enforce_detection: true,
            rate_limiter,
        })
    }

    /// Let the server fall back to the whole image when no face is detected
    pub fn with_enforce_detection(mut self, enforce: bool) -> Self {
        self.enforce_detection = enforce;
        self
    }

    pub fn analyze_url(&self) -> &str {
        &self.analyze_url
    }
}

/// Inline an image as a data URI
fn image_data_uri(bytes: &[u8]) -> String {
    let mime = infer::get(bytes)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
        .unwrap_or("image/jpeg");
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[async_trait::async_trait]
impl AttributeClassifier for DeepFaceHttpClassifier {
    fn name(&self) -> &'static str {
        "deepface-http"
    }

    fn is_reentrant(&self) -> bool {
        true
    }

    async fn ready(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }

    async fn classify(&self, image_path: &Path) -> Result<AttributeResult, ClassifyError> {
        let bytes = match tokio::fs::read(image_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClassifyError::FileNotFound(image_path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let request = AnalyzeRequest {
            img_path: image_data_uri(&bytes),
            actions: ["gender"],
            enforce_detection: self.enforce_detection,
        };

        debug!(image = %image_path.display(), url = %self.analyze_url, "Sending DeepFace analyze request");

        let response = self
            .client
            .post(&self.analyze_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifyError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifyError::Request(e.to_string()))?;

        if !status.is_success() {
            // DeepFace reports analysis errors as {"error": "..."} with a 4xx status
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string));
            return Err(match message {
                Some(message) if status.is_client_error() => ClassifyError::AnalysisFailed(message),
                _ => ClassifyError::Request(format!("HTTP {}: {}", status, body.trim())),
            });
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))?;
        AttributeResult::from_deepface_json(value)
    }
}
