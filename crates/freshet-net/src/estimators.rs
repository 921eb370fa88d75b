#![forbid(unsafe_code)]

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

/// Exponentially-weighted moving average.
///
/// `alpha` is the weight of the previous estimate; the first sample seeds
/// the filter directly.
#[derive(Clone, Debug)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        debug_assert!((0.0..1.0).contains(&alpha));
        Self { alpha, value: None }
    }

    pub fn push(&mut self, sample: f64) {
        self.value = Some(match self.value {
            Some(previous) => self.alpha * previous + (1.0 - self.alpha) * sample,
            None => sample,
        });
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Mean absolute deviation over a sliding time window.
///
/// Samples older than the window are pruned on every push and read.
#[derive(Clone, Debug)]
pub struct WindowedDeviation {
    window: Duration,
    samples: VecDeque<(Instant, f64)>,
}

impl WindowedDeviation {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, now: Instant, sample: f64) {
        self.samples.push_back((now, sample));
        self.prune(now);
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|(_, v)| v).sum::<f64>() / self.samples.len() as f64)
    }

    /// Mean absolute deviation around the window mean; zero while fewer
    /// than two samples are held.
    pub fn deviation(&self) -> f64 {
        let Some(mean) = self.mean() else { return 0.0 };
        if self.samples.len() < 2 {
            return 0.0;
        }
        self.samples.iter().map(|(_, v)| (v - mean).abs()).sum::<f64>()
            / self.samples.len() as f64
    }

    pub fn prune(&mut self, now: Instant) {
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
