//! Relay configuration
//!
//! All knobs are process-wide and read once at construction. Environment
//! variables override the defaults; no config file parsing here.

use std::time::Duration;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Detector base URL
    pub detector_url: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-request read timeout
    pub read_timeout: Duration,
    /// Total attempts for transient failures (first try included)
    pub max_retries: u32,
    /// Payloads below this size are rejected locally (truncated uploads)
    pub min_payload_bytes: usize,
    /// Detections below this confidence are dropped from results
    pub confidence_threshold: f32,
    /// Simultaneous inference calls allowed process-wide
    pub inference_permits: usize,
    /// Consecutive failures before the breaker opens
    pub breaker_failure_threshold: u32,
    /// Cooldown before an open breaker allows trial calls
    pub breaker_recovery_timeout: Duration,
    /// Consecutive trial successes required to close
    pub breaker_success_threshold: u32,
    /// Concurrent trial calls allowed while half-open
    pub breaker_half_open_max_calls: u32,
    /// Frames retained per source
    pub frame_buffer_size: usize,
    /// Frames older than this (vs. the newest insertion) are evicted
    pub frame_max_age_seconds: f64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            connect_timeout: Duration::from_secs_f64(env_parse("DETECTOR_CONNECT_TIMEOUT_SEC", 5.0)),
            read_timeout: Duration::from_secs_f64(env_parse("DETECTOR_READ_TIMEOUT_SEC", 30.0)),
            max_retries: env_parse("DETECTOR_MAX_RETRIES", 3),
            min_payload_bytes: env_parse("MIN_PAYLOAD_BYTES", 1024),
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", 0.5),
            inference_permits: env_parse("INFERENCE_PERMITS", 4),
            breaker_failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5),
            breaker_recovery_timeout: Duration::from_secs_f64(env_parse(
                "BREAKER_RECOVERY_TIMEOUT_SEC",
                30.0,
            )),
            breaker_success_threshold: env_parse("BREAKER_SUCCESS_THRESHOLD", 2),
            breaker_half_open_max_calls: env_parse("BREAKER_HALF_OPEN_MAX_CALLS", 1),
            frame_buffer_size: env_parse("FRAME_BUFFER_SIZE", 16),
            frame_max_age_seconds: env_parse("FRAME_MAX_AGE_SEC", 30.0),
        }
    }
}

impl RelayConfig {
    /// Load `.env` when present, then build the config from the environment
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::default()
    }

    /// Validate knob ranges that would otherwise fail far from here
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_retries == 0 {
            return Err(crate::error::Error::Config(
                "DETECTOR_MAX_RETRIES must be >= 1".to_string(),
            ));
        }
        if self.inference_permits == 0 {
            return Err(crate::error::Error::Config(
                "INFERENCE_PERMITS must be >= 1".to_string(),
            ));
        }
        if self.breaker_failure_threshold == 0
            || self.breaker_success_threshold == 0
            || self.breaker_half_open_max_calls == 0
        {
            return Err(crate::error::Error::Config(
                "breaker thresholds must be >= 1".to_string(),
            ));
        }
        if self.frame_buffer_size == 0 {
            return Err(crate::error::Error::Config(
                "FRAME_BUFFER_SIZE must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(crate::error::Error::Config(
                "CONFIDENCE_THRESHOLD must be within 0.0-1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Breaker config slice for the detector endpoint
    pub fn breaker_config(&self) -> crate::circuit_breaker::CircuitBreakerConfig {
        crate::circuit_breaker::CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            recovery_timeout: self.breaker_recovery_timeout,
            success_threshold: self.breaker_success_threshold,
            half_open_max_calls: self.breaker_half_open_max_calls,
        }
    }
}
