//! Wire types for the detection service

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw detection as returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    /// Object class label
    #[serde(rename = "class")]
    pub label: String,
    /// Confidence score (0-1)
    pub confidence: f32,
    /// Bounding box as [x, y, w, h]
    pub bbox: [f32; 4],
}

/// Successful detection response body
///
/// ```json
/// {"detections": [{"class": "person", "confidence": 0.92, "bbox": [0,0,10,20]}],
///  "processing_time_ms": 41.7, "image_size": [1920, 1080]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub detections: Vec<RawDetection>,

    #[serde(default)]
    pub processing_time_ms: f64,

    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
}

/// Error-path body shape (`{"detail": "..."}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// One filtered detection handed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Object class label
    pub label: String,
    /// Confidence score (0-1)
    pub confidence: f32,
    /// Bounding box as [x, y, w, h]
    pub bounding_box: [f32; 4],
}

/// Result of one inference call, owned by the caller after return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Detections at or above the configured confidence threshold
    pub detections: Vec<Detection>,
    /// Service-side processing time in milliseconds
    pub processing_time_ms: f64,
    /// Source media dimensions as [w, h], when reported
    pub media_dimensions: Option<[u32; 2]>,
}

impl InferenceResult {
    /// Empty result (validation rejections, 4xx responses)
    pub fn empty() -> Self {
        Self {
            detections: Vec::new(),
            processing_time_ms: 0.0,
            media_dimensions: None,
        }
    }
}

/// What the detector said, once transport succeeded.
///
/// Modeled as a tagged union so 4xx rejections flow through the breaker as
/// understood responses rather than dependency failures.
#[derive(Debug)]
pub(crate) enum DetectorReply {
    /// 2xx with a parsed body
    Detections(DetectResponse),
    /// 4xx - the service understood the request and declined it
    Rejected { status: u16, detail: String },
}

/// Persistence boundary: receives filtered detections, fire-and-forget
#[async_trait]
pub trait DetectionSink: Send + Sync {
    /// Called after each successful inference that produced detections
    async fn detections_recorded(
        &self,
        source_id: &str,
        result: &InferenceResult,
        captured_at: DateTime<Utc>,
    );
}
