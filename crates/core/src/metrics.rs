//! Per-session stream metrics.
//!
//! A single writer — the video pipeline's metrics tick — publishes the
//! whole record once per second through [`MetricsHub`]; everyone else
//! (renderer, supervisor, CLI overlays) takes cheap cloned snapshots.
//! Readers tolerate values that are stale by one tick.
//!
//! All counters are monotonic within a session except the windowed
//! bitrate ring, which holds the last three one-second samples.

use parking_lot::RwLock;

/// Number of samples in the windowed bitrate ring.
pub const BITRATE_RING_LEN: usize = 3;

/// Sanity ceiling for the windowed bitrate estimate.
pub const BITRATE_CEILING_MBPS: f64 = 100.0;

/// Three-sample ring of per-second byte/frame deltas.
///
/// The windowed estimate answers "what is the stream actually delivering
/// right now" without a single hiccup dominating the number.
#[derive(Debug, Clone, Default)]
pub struct BitrateRing {
    samples: [(u64, u32); BITRATE_RING_LEN],
    len: usize,
    next: usize,
}

impl BitrateRing {
    /// Push one second's worth of `(bytes, frames)`.
    pub fn push(&mut self, bytes: u64, frames: u32) {
        self.samples[self.next] = (bytes, frames);
        self.next = (self.next + 1) % BITRATE_RING_LEN;
        self.len = (self.len + 1).min(BITRATE_RING_LEN);
    }

    /// Windowed megabits per second at the given frame rate, clamped to
    /// [`BITRATE_CEILING_MBPS`]. `None` until a sample exists.
    pub fn mbps(&self, fps: u32) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let (sum_bytes, sum_frames) = self.samples[..self.len]
            .iter()
            .fold((0u64, 0u64), |(b, f), &(sb, sf)| (b + sb, f + sf as u64));
        if sum_frames == 0 {
            return Some(0.0);
        }
        let mbps = (sum_bytes as f64 * 8.0 * fps as f64) / sum_frames as f64 / 1e6;
        Some(mbps.min(BITRATE_CEILING_MBPS))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-session scalar metrics record.
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    pub measured_rtt_ms: f64,
    pub measured_bitrate_mbps: f64,
    pub windowed_bitrate_mbps: f64,
    pub measured_incoming_fps: u32,
    pub target_fps: u32,
    pub negotiated_fps: u32,
    /// Decode time of the most recent frame.
    pub decode_time_us: u64,
    /// Mean decode time over the last metrics window.
    pub decode_avg_us: u64,
    /// Worst decode time over the last metrics window.
    pub decode_max_us: u64,
    pub display_fps: u32,
    /// Decoded frames that replaced a frame the renderer never consumed.
    pub frame_overwrite_count: u32,
    /// Encoded frames dropped by decode-queue backpressure.
    pub decode_queue_drops: u32,
    pub transport_drop_events: u32,
    pub transport_drop_packets: u32,
    pub av_missing_ref_count: u32,
    pub av_corrupt_burst_count: u32,
    pub av_fec_fail_count: u32,
    pub av_sendbuf_overflow_count: u32,
    /// Metrics ticks where the diag mutex was contended.
    pub diag_trylock_failures: u32,
    /// Consecutive stale diagnostics ticks (resets on a successful copy).
    pub av_diag_stale_streak: u32,
}

/// Shared metrics record: one writer, many snapshot readers.
#[derive(Debug, Default)]
pub struct MetricsHub {
    inner: RwLock<StreamMetrics>,
}

impl MetricsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a full record. Called once per tick by the video pipeline.
    pub fn publish(&self, metrics: StreamMetrics) {
        *self.inner.write() = metrics;
    }

    /// Coherent copy of the most recently published record.
    pub fn snapshot(&self) -> StreamMetrics {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_empty_has_no_estimate() {
        let ring = BitrateRing::default();
        assert_eq!(ring.mbps(30), None);
    }

    #[test]
    fn ring_windowed_estimate() {
        let mut ring = BitrateRing::default();
        // 30 frames of 5000 bytes per second: 5000 * 30 * 8 = 1.2 Mbps.
        ring.push(150_000, 30);
        let mbps = ring.mbps(30).unwrap();
        assert!((mbps - 1.2).abs() < 1e-9, "got {mbps}");
    }

    #[test]
    fn ring_keeps_last_three() {
        let mut ring = BitrateRing::default();
        ring.push(1_000_000, 30);
        ring.push(150_000, 30);
        ring.push(150_000, 30);
        ring.push(150_000, 30); // evicts the outlier
        let mbps = ring.mbps(30).unwrap();
        assert!((mbps - 1.2).abs() < 1e-9, "got {mbps}");
    }

    #[test]
    fn ring_clamps_to_ceiling() {
        let mut ring = BitrateRing::default();
        ring.push(u64::MAX / 16, 1);
        assert_eq!(ring.mbps(60).unwrap(), BITRATE_CEILING_MBPS);
    }

    #[test]
    fn ring_zero_frames_is_zero() {
        let mut ring = BitrateRing::default();
        ring.push(0, 0);
        assert_eq!(ring.mbps(30).unwrap(), 0.0);
    }

    #[test]
    fn hub_snapshot_roundtrip() {
        let hub = MetricsHub::new();
        let mut m = StreamMetrics::default();
        m.measured_incoming_fps = 59;
        m.decode_avg_us = 4200;
        hub.publish(m);
        let snap = hub.snapshot();
        assert_eq!(snap.measured_incoming_fps, 59);
        assert_eq!(snap.decode_avg_us, 4200);
    }
}
