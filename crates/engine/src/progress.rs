//! Progress events and transfer speed tracking.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use roadhaul_protocol::SessionStatus;

/// Event emitted on the engine's progress stream.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Progress update for a session.
    Progress {
        fingerprint: String,
        percent: u8,
        status: SessionStatus,
        message: String,
        /// Smoothed transfer rate; 0.0 until enough samples exist.
        bytes_per_sec: f64,
    },
    /// The session finished and its persisted record was purged.
    Completed { fingerprint: String },
    /// The session is parked in `Error`; resumable.
    Failed { fingerprint: String, error: String },
    /// The session was aborted and locally cleaned up.
    Aborted { fingerprint: String },
}

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a calculator with a 5 s window and 100 retained samples.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(5), 100)
    }

    pub fn with_window(window_size: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples,
                window_size,
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        let cutoff = now - s.window_size;
        s.samples.retain(|sample| sample.timestamp >= cutoff);

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window; 0.0 with fewer than
    /// 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }
        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`; `None` if speed is 0.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all samples.
    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new()
    }
}
