//! camrelay - Resilient Inference Relay Core
//!
//! Sits between concurrent callers and an HTTP object-detection service.
//!
//! ## Components
//!
//! 1. CircuitBreaker - named failure tracker with registry
//! 2. ConcurrencyGate - process-wide inference permit pool
//! 3. FrameBuffer - per-source age/capacity-bounded frame ring
//! 4. DetectorClient - validated, breaker-guarded, retried inference calls
//! 5. SourceStatusTracker - source liveness (lost/recovered events)
//!
//! ## Design Principles
//!
//! - A misbehaving detector degrades callers to "no detections", never crashes them
//! - Permits and trial slots are RAII; cancellation leaks nothing
//! - Frame rings are per-source and never block each other

pub mod circuit_breaker;
pub mod concurrency_gate;
pub mod config;
pub mod detector_client;
pub mod error;
pub mod frame_buffer;
pub mod source_status;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use concurrency_gate::ConcurrencyGate;
pub use config::RelayConfig;
pub use detector_client::{Detection, DetectionSink, DetectorClient, InferenceResult};
pub use error::{Error, Result};
pub use frame_buffer::FrameBuffer;
pub use source_status::{SourceActivitySink, SourceStatusEvent, SourceStatusTracker};

/// Initialize tracing with `RUST_LOG`-style filtering.
///
/// Safe to call more than once; later calls are no-ops so test binaries can
/// call it from every case.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
