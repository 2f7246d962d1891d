//! FrameBuffer - Per-Source Temporal Frame Ring
//!
//! ## Responsibilities
//!
//! - Keep the most recent frames per source, bounded by count and age
//! - Evict entries older than `max_age_seconds` relative to the newest insertion
//! - Serve evenly-sampled temporal sequences for clip assembly
//!
//! Rings are created lazily on first insertion and are independent per
//! source; eviction and append happen atomically under the map's write lock.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// One buffered frame
#[derive(Debug, Clone)]
pub struct FrameEntry {
    /// Raw frame bytes (JPEG)
    pub payload: Vec<u8>,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

/// FrameBuffer configuration
#[derive(Debug, Clone)]
pub struct FrameBufferConfig {
    /// Frames retained per source
    pub buffer_size: usize,
    /// Maximum frame age in seconds, measured against the newest insertion
    pub max_age_seconds: f64,
}

impl Default for FrameBufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16,
            max_age_seconds: 30.0,
        }
    }
}

/// Per-source bounded frame rings
pub struct FrameBuffer {
    rings: RwLock<HashMap<String, VecDeque<FrameEntry>>>,
    config: FrameBufferConfig,
}

impl FrameBuffer {
    /// Create new FrameBuffer
    pub fn new(config: FrameBufferConfig) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create with default config (16 frames, 30s max age)
    pub fn with_defaults() -> Self {
        Self::new(FrameBufferConfig::default())
    }

    /// Append a frame for a source.
    ///
    /// Creates the ring on first insertion. Entries older than
    /// `captured_at - max_age_seconds` are evicted from the oldest end
    /// before the append; at capacity the oldest entry is displaced.
    pub async fn add_frame(&self, source_id: &str, payload: Vec<u8>, captured_at: DateTime<Utc>) {
        let size = payload.len();
        let mut rings = self.rings.write().await;
        let ring = rings.entry(source_id.to_string()).or_default();

        let cutoff_ms = (self.config.max_age_seconds * 1000.0) as i64;
        while let Some(oldest) = ring.front() {
            let age_ms = captured_at
                .signed_duration_since(oldest.captured_at)
                .num_milliseconds();
            if age_ms > cutoff_ms {
                ring.pop_front();
            } else {
                break;
            }
        }

        if ring.len() >= self.config.buffer_size {
            ring.pop_front();
        }
        ring.push_back(FrameEntry {
            payload,
            captured_at,
        });

        tracing::trace!(
            source_id = %source_id,
            size = size,
            buffered = ring.len(),
            "Frame buffered"
        );
    }

    /// Evenly-sampled temporal sequence of `n` frames for a source.
    ///
    /// Returns `None` when fewer than `n` frames are buffered. Otherwise the
    /// `n` sample indices are spaced evenly across `[0, count-1]` inclusive,
    /// so the oldest and newest buffered frames are always part of the
    /// sequence. Repeated calls with unchanged buffer state return the same
    /// frames.
    pub async fn get_sequence(&self, source_id: &str, n: usize) -> Option<Vec<Vec<u8>>> {
        if n == 0 {
            return Some(Vec::new());
        }

        let rings = self.rings.read().await;
        let ring = rings.get(source_id)?;
        let count = ring.len();
        if count < n {
            return None;
        }

        let sequence = sample_indices(count, n)
            .into_iter()
            .map(|idx| ring[idx].payload.clone())
            .collect();
        Some(sequence)
    }

    /// Number of frames buffered for a source (0 for unseen sources)
    pub async fn frame_count(&self, source_id: &str) -> usize {
        self.rings
            .read()
            .await
            .get(source_id)
            .map(|ring| ring.len())
            .unwrap_or(0)
    }

    /// Drop the ring for one source
    pub async fn clear(&self, source_id: &str) {
        self.rings.write().await.remove(source_id);
    }

    /// Drop all rings
    pub async fn clear_all(&self) {
        self.rings.write().await.clear();
    }

    /// Aggregate buffer statistics
    pub async fn stats(&self) -> BufferStats {
        let rings = self.rings.read().await;
        let frame_count = rings.values().map(|r| r.len()).sum();
        let total_bytes = rings
            .values()
            .flat_map(|r| r.iter())
            .map(|e| e.payload.len())
            .sum();
        BufferStats {
            source_count: rings.len(),
            frame_count,
            total_bytes,
        }
    }
}

/// `n` indices evenly spaced across `[0, count-1]` inclusive.
///
/// For `n == 1` the single sample is index 0 (the oldest frame), matching
/// an inclusive linspace over the buffer.
fn sample_indices(count: usize, n: usize) -> Vec<usize> {
    debug_assert!(n >= 1 && count >= n);
    if n == 1 {
        return vec![0];
    }
    (0..n)
        .map(|i| {
            let pos = (i as f64) * ((count - 1) as f64) / ((n - 1) as f64);
            pos.round() as usize
        })
        .collect()
}

/// Aggregate statistics
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// Number of sources with a ring
    pub source_count: usize,
    /// Total buffered frames
    pub frame_count: usize,
    /// Total payload bytes held
    pub total_bytes: usize,
}
