//! Activity meter
//!
//! Derives a coarse 0.0 - 1.0 activity level from the most recent captured
//! samples for display. The level is a frequency-domain magnitude average:
//! a Blackman-windowed DFT over a 256-sample window, each bin mapped from
//! decibels onto 0..1, then averaged across the 128 bins.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

// =============================================================================
// Constants
// =============================================================================

/// Samples analysed per measurement
pub const METER_WINDOW: usize = 256;

/// Number of frequency bins produced from one window
pub const METER_BINS: usize = METER_WINDOW / 2;

/// Meter polling interval (~60fps)
pub const METER_INTERVAL_MS: u64 = 16;

/// Bin magnitudes at or below this level read as silence
const MIN_DECIBELS: f32 = -100.0;

/// Bin magnitudes at or above this level read as full scale
const MAX_DECIBELS: f32 = -30.0;

// =============================================================================
// Shared Level
// =============================================================================

/// Activity level shared with the presentation layer
///
/// Stored as f32 bits so readers never block the session thread.
#[derive(Debug, Clone, Default)]
pub struct ActivityLevel(Arc<AtomicU32>);

impl ActivityLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

// =============================================================================
// Activity Meter
// =============================================================================

/// Read-only tap on the capture path
pub struct ActivityMeter {
    recent: VecDeque<f32>,
    window: Vec<f32>,
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    level: ActivityLevel,
}

impl ActivityMeter {
    pub fn new(level: ActivityLevel) -> Self {
        let n = METER_WINDOW as f32;
        // Blackman window
        let window = (0..METER_WINDOW)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();
        let cos_table = (0..METER_WINDOW)
            .map(|i| (2.0 * PI * i as f32 / n).cos())
            .collect();
        let sin_table = (0..METER_WINDOW)
            .map(|i| (2.0 * PI * i as f32 / n).sin())
            .collect();

        Self {
            recent: VecDeque::with_capacity(METER_WINDOW),
            window,
            cos_table,
            sin_table,
            level,
        }
    }

    /// Handle to the published level
    pub fn level(&self) -> &ActivityLevel {
        &self.level
    }

    /// Remember the newest samples, keeping only the analysis window
    pub fn push(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(METER_WINDOW);
        for &sample in &samples[skip..] {
            if self.recent.len() == METER_WINDOW {
                self.recent.pop_front();
            }
            self.recent.push_back(sample);
        }
    }

    /// Recompute and publish the level from the current window
    pub fn measure(&mut self) -> f32 {
        let level = self.spectral_level();
        self.level.set(level);
        level
    }

    /// Forget buffered samples and publish silence
    pub fn reset(&mut self) {
        self.recent.clear();
        self.level.set(0.0);
    }

    fn spectral_level(&self) -> f32 {
        if self.recent.is_empty() {
            return 0.0;
        }

        // Zero-pad from the front when fewer than a full window has arrived
        let offset = METER_WINDOW - self.recent.len();
        let mut windowed = [0.0f32; METER_WINDOW];
        for (i, &sample) in self.recent.iter().enumerate() {
            windowed[offset + i] = sample * self.window[offset + i];
        }

        let scale = 1.0 / METER_WINDOW as f32;
        let total: f32 = (0..METER_BINS)
            .map(|k| {
                let (mut re, mut im) = (0.0f32, 0.0f32);
                for (n, &x) in windowed.iter().enumerate() {
                    let idx = (k * n) % METER_WINDOW;
                    re += x * self.cos_table[idx];
                    im -= x * self.sin_table[idx];
                }
                let magnitude = (re * re + im * im).sqrt() * scale;
                let db = 20.0 * magnitude.max(f32::MIN_POSITIVE).log10();
                ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
            })
            .sum();

        total / METER_BINS as f32
    }
}
