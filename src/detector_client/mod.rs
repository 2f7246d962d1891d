//! DetectorClient - Resilient Detection Service Adapter
//!
//! ## Responsibilities
//!
//! - Local payload validation (size + media signature), no network on reject
//! - Bounded concurrency via the process-wide inference gate
//! - Breaker-guarded network calls with capped exponential-backoff retries
//! - Outcome classification: transient vs. request-content failures
//! - Best-effort frame buffering and source-activity notification
//!
//! ## Failure policy
//!
//! Callers only ever see two error classes: the breaker-open rejection and
//! the typed unavailability error after retries are exhausted. Everything
//! else (bad payloads, 4xx, malformed bodies) degrades to an empty result
//! so a misbehaving detector never crashes a caller loop.
//!
//! A malformed 2xx body is not retried, but unlike a 4xx it does count as a
//! breaker failure: a 4xx means the detector understood the request and
//! declined it, while garbage on the success path means the dependency
//! itself is unhealthy.

mod types;

pub use types::{DetectResponse, Detection, DetectionSink, ErrorDetail, InferenceResult, RawDetection};
pub(crate) use types::DetectorReply;

use crate::circuit_breaker::CircuitBreaker;
use crate::concurrency_gate::ConcurrencyGate;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::frame_buffer::FrameBuffer;
use crate::source_status::SourceActivitySink;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;

/// Backoff cap between retry attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Resilient inference client
pub struct DetectorClient {
    client: reqwest::Client,
    config: RelayConfig,
    breaker: Arc<CircuitBreaker>,
    gate: Arc<ConcurrencyGate>,
    frames: Arc<FrameBuffer>,
    activity_sink: Option<Arc<dyn SourceActivitySink>>,
    detection_sink: Option<Arc<dyn DetectionSink>>,
}

impl DetectorClient {
    /// Create new client around an existing breaker, gate and frame buffer
    pub fn new(
        config: RelayConfig,
        breaker: Arc<CircuitBreaker>,
        gate: Arc<ConcurrencyGate>,
        frames: Arc<FrameBuffer>,
    ) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            breaker,
            gate,
            frames,
            activity_sink: None,
            detection_sink: None,
        })
    }

    /// Attach the source-liveness collaborator
    pub fn with_activity_sink(mut self, sink: Arc<dyn SourceActivitySink>) -> Self {
        self.activity_sink = Some(sink);
        self
    }

    /// Attach the persistence boundary
    pub fn with_detection_sink(mut self, sink: Arc<dyn DetectionSink>) -> Self {
        self.detection_sink = Some(sink);
        self
    }

    /// Shared frame buffer (clip assembly lives outside this client)
    pub fn frame_buffer(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    /// Breaker guarding this client's endpoint
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Check detector health endpoint
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.config.detector_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Run detection on a frame.
    ///
    /// Returns the filtered detections, or an empty result for payloads the
    /// detector cannot use (undersized, corrupt, 4xx-rejected). Errors are
    /// limited to `Error::CircuitOpen` and `Error::Unavailable`.
    pub async fn detect(&self, payload: Vec<u8>, source_id: &str) -> Result<InferenceResult> {
        let captured_at = Utc::now();

        if let Err(reason) = validate_payload(&payload, self.config.min_payload_bytes) {
            tracing::warn!(
                source_id = %source_id,
                size = payload.len(),
                reason = %reason,
                "Payload rejected locally, skipping inference"
            );
            return Ok(InferenceResult::empty());
        }

        // Held for every exit path below
        let _permit = self.gate.acquire().await;

        let outcome = self
            .breaker
            .call(|| self.infer_with_retry(&payload, source_id, captured_at))
            .await;

        match outcome {
            Ok(DetectorReply::Detections(raw)) => {
                let result = filter_response(raw, self.config.confidence_threshold);

                // Best-effort side channel; never surfaces to the caller
                self.frames.add_frame(source_id, payload, captured_at).await;

                if !result.detections.is_empty() {
                    if let Some(sink) = &self.activity_sink {
                        sink.source_active(source_id, captured_at).await;
                    }
                    if let Some(sink) = &self.detection_sink {
                        sink.detections_recorded(source_id, &result, captured_at).await;
                    }
                }

                tracing::debug!(
                    source_id = %source_id,
                    detections = result.detections.len(),
                    processing_time_ms = result.processing_time_ms,
                    "Detection completed"
                );
                Ok(result)
            }
            Ok(DetectorReply::Rejected { status, detail }) => {
                tracing::warn!(
                    source_id = %source_id,
                    status = status,
                    detail = %detail,
                    "Detector rejected request, returning empty result"
                );
                Ok(InferenceResult::empty())
            }
            Err(Error::Serialization(e)) => {
                tracing::error!(
                    source_id = %source_id,
                    error = %e,
                    "Detector returned malformed body, returning empty result"
                );
                Ok(InferenceResult::empty())
            }
            Err(e) => Err(e),
        }
    }

    /// Network attempt loop: transient failures retried with capped backoff
    async fn infer_with_retry(
        &self,
        payload: &[u8],
        source_id: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<DetectorReply> {
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.config.max_retries {
            if attempt > 1 {
                let delay = retry_delay(attempt - 1);
                tracing::debug!(
                    source_id = %source_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying detector call"
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_once(payload, source_id, captured_at).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        source_id = %source_id,
                        attempt = attempt,
                        error = %e,
                        "Transient detector failure"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let cause = last_error
            .unwrap_or_else(|| Error::Internal("retry loop made no attempts".to_string()));
        Err(Error::Unavailable {
            attempts: self.config.max_retries,
            cause: Box::new(cause),
        })
    }

    /// One HTTP attempt, classified into reply/transient/non-transient
    async fn send_once(
        &self,
        payload: &[u8],
        source_id: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<DetectorReply> {
        let url = format!("{}/v1/detect", self.config.detector_url);

        let form = Form::new()
            .part(
                "image",
                Part::bytes(payload.to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("source_id", source_id.to_string())
            .text("captured_at", captured_at.to_rfc3339());

        let resp = self.client.post(&url).multipart(form).send().await?;
        let status = resp.status();

        if status.is_success() {
            let text = resp.text().await?;
            let body: DetectResponse = serde_json::from_str(&text)?;
            return Ok(DetectorReply::Detections(body));
        }

        // Body-parse failure on an error path means "no detail available"
        let body = resp.text().await.unwrap_or_default();
        let detail = error_detail(&body);

        if status.is_server_error() {
            Err(Error::DetectorStatus {
                status: status.as_u16(),
                detail,
            })
        } else {
            Ok(DetectorReply::Rejected {
                status: status.as_u16(),
                detail,
            })
        }
    }
}

/// Delay before retry `k` (1-based): min(2^(k-1) s, 30 s)
fn retry_delay(k: u32) -> Duration {
    let exp = k.saturating_sub(1).min(10);
    Duration::from_secs(1u64 << exp).min(MAX_RETRY_DELAY)
}

/// Local payload checks: presence, minimum size, media signature
fn validate_payload(payload: &[u8], min_bytes: usize) -> std::result::Result<(), String> {
    if payload.is_empty() {
        return Err("empty payload".to_string());
    }
    if payload.len() < min_bytes {
        return Err(format!(
            "payload below minimum size ({} < {} bytes)",
            payload.len(),
            min_bytes
        ));
    }
    if !media_signature_ok(payload) {
        return Err("unrecognized or corrupt media".to_string());
    }
    Ok(())
}

/// Cheap integrity check on the frame bytes (JPEG/PNG/WebP)
fn media_signature_ok(payload: &[u8]) -> bool {
    // JPEG: SOI marker and EOI trailer
    if payload.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return payload.ends_with(&[0xFF, 0xD9]);
    }
    // PNG signature
    if payload.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return true;
    }
    // WebP: RIFF....WEBP
    if payload.len() >= 12 && &payload[0..4] == b"RIFF" && &payload[8..12] == b"WEBP" {
        return true;
    }
    false
}

/// Extract a human-readable detail from a non-2xx body
fn error_detail(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorDetail>(body) {
        return parsed.detail;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no detail available".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Drop detections below the confidence threshold, keep response order
fn filter_response(raw: DetectResponse, threshold: f32) -> InferenceResult {
    let detections = raw
        .detections
        .into_iter()
        .filter(|d| d.confidence >= threshold)
        .map(|d| Detection {
            label: d.label,
            confidence: d.confidence,
            bounding_box: d.bbox,
        })
        .collect();

    InferenceResult {
        detections,
        processing_time_ms: raw.processing_time_ms,
        media_dimensions: raw.image_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;

    /// Well-formed JPEG-looking payload of the requested size
    fn fake_jpeg(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len.max(8)];
        data[0..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        let end = data.len();
        data[end - 2..].copy_from_slice(&[0xFF, 0xD9]);
        data
    }

    fn test_client(config: RelayConfig) -> DetectorClient {
        let breaker = Arc::new(CircuitBreaker::new(
            "detector",
            CircuitBreakerConfig::default(),
        ));
        let gate = Arc::new(ConcurrencyGate::new(config.inference_permits));
        let frames = Arc::new(FrameBuffer::with_defaults());
        DetectorClient::new(config, breaker, gate, frames).unwrap()
    }

    #[test]
    fn test_retry_delay_schedule() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
        assert_eq!(retry_delay(6), Duration::from_secs(30));
        assert_eq!(retry_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn test_media_signature_checks() {
        assert!(media_signature_ok(&fake_jpeg(64)));

        let mut png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&[0u8; 32]);
        assert!(media_signature_ok(&png));

        let mut webp = Vec::new();
        webp.extend_from_slice(b"RIFF");
        webp.extend_from_slice(&[0u8; 4]);
        webp.extend_from_slice(b"WEBP");
        assert!(media_signature_ok(&webp));

        // JPEG missing its EOI trailer (truncated upload)
        let mut truncated = fake_jpeg(64);
        truncated.truncate(32);
        assert!(!media_signature_ok(&truncated));

        assert!(!media_signature_ok(&[0u8; 64]));
    }

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload(&fake_jpeg(2048), 1024).is_ok());
        assert!(validate_payload(&[], 1024).is_err());
        assert!(validate_payload(&fake_jpeg(100), 1024).is_err());
        assert!(validate_payload(&vec![0u8; 2048], 1024).is_err());
    }

    #[test]
    fn test_error_detail_extraction() {
        assert_eq!(error_detail(r#"{"detail": "model not loaded"}"#), "model not loaded");
        assert_eq!(error_detail("upstream timeout"), "upstream timeout");
        assert_eq!(error_detail(""), "no detail available");
        assert_eq!(error_detail("  \n "), "no detail available");
    }

    #[test]
    fn test_filter_response_threshold_and_order() {
        let raw = DetectResponse {
            detections: vec![
                RawDetection {
                    label: "person".to_string(),
                    confidence: 0.9,
                    bbox: [0.0, 0.0, 10.0, 20.0],
                },
                RawDetection {
                    label: "cat".to_string(),
                    confidence: 0.3,
                    bbox: [1.0, 1.0, 5.0, 5.0],
                },
                RawDetection {
                    label: "car".to_string(),
                    confidence: 0.5,
                    bbox: [2.0, 2.0, 8.0, 8.0],
                },
            ],
            processing_time_ms: 12.5,
            image_size: Some([640, 480]),
        };

        let result = filter_response(raw, 0.5);
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.detections[0].label, "person");
        assert_eq!(result.detections[1].label, "car");
        assert_eq!(result.media_dimensions, Some([640, 480]));
    }

    #[tokio::test]
    async fn test_undersized_payload_never_reaches_network() {
        // Unroutable port: any accidental network call would error out
        let config = RelayConfig {
            detector_url: "http://127.0.0.1:9".to_string(),
            min_payload_bytes: 1024,
            ..RelayConfig::default()
        };
        let client = test_client(config);

        let result = client.detect(fake_jpeg(100), "cam1").await.unwrap();
        assert!(result.detections.is_empty());
        assert_eq!(client.frame_buffer().frame_count("cam1").await, 0);
        assert_eq!(client.breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_payload_returns_empty() {
        let config = RelayConfig {
            detector_url: "http://127.0.0.1:9".to_string(),
            min_payload_bytes: 64,
            ..RelayConfig::default()
        };
        let client = test_client(config);

        let result = client.detect(vec![0u8; 2048], "cam1").await.unwrap();
        assert!(result.detections.is_empty());
    }
}
