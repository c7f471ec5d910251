// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Cycle-to-cycle smoothing.
//!
//! The current value is blended with up to `window - 1` previous cycles
//! using a fixed, increasing weight vector so the latest cycle weighs most.
//! History keeps the raw per-cycle values; smoothed output is never fed
//! back.

use crate::{lidar::Error, metrics::MetricsResult};
use std::collections::VecDeque;

/// Largest supported smoothing window.
pub const MAX_WINDOW: usize = 6;

const WEIGHTS_1: [f64; 1] = [1.0];
const WEIGHTS_2: [f64; 2] = [0.4, 0.6];
const WEIGHTS_3: [f64; 3] = [0.2, 0.3, 0.5];
const WEIGHTS_4: [f64; 4] = [0.1, 0.2, 0.3, 0.4];
const WEIGHTS_5: [f64; 5] = [0.1, 0.15, 0.2, 0.25, 0.3];
const WEIGHTS_6: [f64; 6] = [0.1, 0.12, 0.15, 0.18, 0.2, 0.25];

/// Weights for a window of `len` values, oldest first.
pub fn smoothing_weights(len: usize) -> Option<&'static [f64]> {
    match len {
        1 => Some(&WEIGHTS_1),
        2 => Some(&WEIGHTS_2),
        3 => Some(&WEIGHTS_3),
        4 => Some(&WEIGHTS_4),
        5 => Some(&WEIGHTS_5),
        6 => Some(&WEIGHTS_6),
        _ => None,
    }
}

/// Normalized weighted sum of `history` followed by `current`.
fn blend(history: impl ExactSizeIterator<Item = f64>, current: f64) -> f64 {
    // callers bound the history length to MAX_WINDOW - 1
    let weights = smoothing_weights(history.len() + 1).unwrap_or(&WEIGHTS_1);
    let total: f64 = weights.iter().sum();
    let sum: f64 = history
        .chain(std::iter::once(current))
        .zip(weights)
        .map(|(v, w)| v * w)
        .sum();
    sum / (total + 1e-8)
}

/// Holds the raw results of recent cycles and blends new ones with them.
#[derive(Clone, Debug)]
pub struct TemporalSmoother {
    history: VecDeque<MetricsResult>,
    capacity: usize,
}

impl TemporalSmoother {
    /// `window` counts the current cycle, so history keeps `window - 1`
    /// entries. Windows outside `1..=6` are rejected.
    pub fn new(window: usize) -> Result<Self, Error> {
        if window == 0 || window > MAX_WINDOW {
            return Err(Error::HistoryWindow(window));
        }
        Ok(Self {
            history: VecDeque::with_capacity(window - 1),
            capacity: window - 1,
        })
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &MetricsResult> {
        self.history.iter()
    }

    /// Blend a raw floor estimate with the floors of previous cycles.
    pub fn smoothed_floor(&self, raw: f64) -> f64 {
        blend(self.history.iter().map(|h| h.lowest_z), raw)
    }

    /// Smoothed copy of `raw`. Volume, area, max and mean height are blended;
    /// `lowest_z` and the quadrant pass through.
    pub fn smooth(&self, raw: &MetricsResult) -> MetricsResult {
        MetricsResult {
            volume: blend(self.history.iter().map(|h| h.volume), raw.volume),
            area: blend(self.history.iter().map(|h| h.area), raw.area),
            max_height: blend(self.history.iter().map(|h| h.max_height), raw.max_height),
            mean_height: blend(self.history.iter().map(|h| h.mean_height), raw.mean_height),
            ..*raw
        }
    }

    /// Append a raw result, evicting the oldest once full.
    pub fn record(&mut self, raw: MetricsResult) {
        if self.capacity == 0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(v: f64) -> MetricsResult {
        MetricsResult {
            volume: v,
            area: v * 2.0,
            max_height: v * 3.0,
            mean_height: v * 4.0,
            lowest_z: v * 5.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        for len in 1..=MAX_WINDOW {
            let w = smoothing_weights(len).unwrap();
            assert_eq!(w.len(), len);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "len {len} sums to {sum}");
            assert!(w.windows(2).all(|p| p[0] < p[1]));
        }
        assert!(smoothing_weights(0).is_none());
        assert!(smoothing_weights(7).is_none());
    }

    #[test]
    fn test_empty_history_is_identity() {
        let smoother = TemporalSmoother::new(5).unwrap();
        let raw = result(1.25);
        let smoothed = smoother.smooth(&raw);
        assert!((smoothed.volume - raw.volume).abs() < 1e-6);
        assert!((smoothed.mean_height - raw.mean_height).abs() < 1e-6);
        assert!((smoother.smoothed_floor(2.0) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_blend() {
        let mut smoother = TemporalSmoother::new(3).unwrap();
        smoother.record(result(1.0));
        smoother.record(result(2.0));
        // 0.2 * 1 + 0.3 * 2 + 0.5 * 4
        let smoothed = smoother.smooth(&result(4.0));
        assert!((smoothed.volume - 2.8).abs() < 1e-6);
        assert!((smoothed.area - 5.6).abs() < 1e-6);
        assert_eq!(smoothed.lowest_z, 20.0);
        assert!((smoother.smoothed_floor(20.0) - 14.0).abs() < 1e-6);
    }

    #[test]
    fn test_history_bound_and_eviction() {
        let mut smoother = TemporalSmoother::new(5).unwrap();
        for i in 0..12 {
            smoother.record(result(i as f64));
            assert!(smoother.len() <= 4);
        }
        let volumes: Vec<f64> = smoother.history().map(|h| h.volume).collect();
        assert_eq!(volumes, vec![8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_window_of_one_keeps_nothing() {
        let mut smoother = TemporalSmoother::new(1).unwrap();
        smoother.record(result(3.0));
        assert!(smoother.is_empty());
        assert!((smoother.smooth(&result(7.0)).volume - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_limits() {
        assert!(matches!(TemporalSmoother::new(7), Err(Error::HistoryWindow(7))));
        assert!(matches!(TemporalSmoother::new(0), Err(Error::HistoryWindow(0))));
        assert!(TemporalSmoother::new(6).is_ok());
    }
}
