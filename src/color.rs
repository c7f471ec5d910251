// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point colorization.
//!
//! Scalar fields (intensity, depth) are quantized into [`RAMP_LEVELS`] steps
//! of a 256-entry jet ramp. Only the first 192 entries are used so the high
//! end stops at orange instead of saturating to dark red.

use crate::lidar::PointCloud;

/// Number of ramp entries used for scalar colorization.
pub const RAMP_LEVELS: usize = 192;

/// Color of points lying on the floor.
pub const FLOOR_COLOR: [f32; 3] = [1.0, 0.0, 1.0];
/// Color of points above the alert height.
pub const ALERT_COLOR: [f32; 3] = [1.0, 0.0, 0.0];
/// Color used when every cargo point has the same height.
pub const UNIFORM_COLOR: [f32; 3] = [0.2, 0.4, 0.8];

/// Jet ramp entry `level` out of 256.
fn jet(level: usize) -> [f32; 3] {
    let t = level.min(255) as f32 / 255.0;
    let channel = |offset: f32| (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Map `values` to ramp colors after min/max normalization.
///
/// A constant input maps every value to the first ramp entry.
pub fn ramp_colors(values: &[f32]) -> Vec<[f32; 3]> {
    let (min, max) = min_max(values);
    let scale = 1.0 / ((max - min) as f64 + 1e-8);
    values
        .iter()
        .map(|&v| {
            let norm = ((v - min) as f64 * scale).clamp(0.0, 1.0);
            jet((norm * (RAMP_LEVELS - 1) as f64) as usize)
        })
        .collect()
}

fn min_max(values: &[f32]) -> (f32, f32) {
    values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Color a cargo cloud by height above `floor`.
///
/// Points no more than `floor_threshold` above the floor are drawn in
/// [`FLOOR_COLOR`] and points whose scaled height exceeds `alert_height` in
/// [`ALERT_COLOR`]. The rest go on a blue ramp from dark (low) to light
/// (high), normalized over those points only.
pub fn height_colors(
    cloud: &PointCloud,
    floor: f32,
    floor_threshold: f32,
    alert_height: f32,
    height_scale: f32,
) -> Vec<[f32; 3]> {
    let heights: Vec<f32> = cloud.z.iter().map(|&z| (floor - z) * height_scale).collect();
    let is_floor = |i: usize| cloud.z[i] >= floor - floor_threshold;
    let is_alert = |i: usize| heights[i] > alert_height;

    let normal: Vec<f32> = (0..heights.len())
        .filter(|&i| !is_floor(i) && !is_alert(i))
        .map(|i| heights[i])
        .collect();
    let (min, max) = min_max(&normal);

    (0..heights.len())
        .map(|i| {
            if is_alert(i) {
                ALERT_COLOR
            } else if is_floor(i) {
                FLOOR_COLOR
            } else if max > min {
                let t = (heights[i] - min) / (max - min);
                [t * 0.3, t * 0.7, 0.5 + t * 0.5]
            } else {
                UNIFORM_COLOR
            }
        })
        .collect()
}
