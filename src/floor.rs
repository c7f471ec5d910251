// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Floor height estimation from plane points.
//!
//! The floor spans the whole scan so it dominates the far end of the depth
//! distribution. The 90th percentile of z (z grows downward) anchors the
//! search while tolerating cargo tops above it; points within `δ` of the
//! anchor are handed to a consensus plane fit with inlier distance `δ/2`.
//! The reported floor height is the plane's depth on the sensor axis,
//! `z0 = -d/c`.

use crate::{
    geometry::PlaneFitter,
    lidar::PointCloud,
};
use tracing::{info, warn};

/// Percentile of plane-point depth used as the floor anchor.
pub const ANCHOR_PERCENTILE: f64 = 90.0;

/// Points per consensus sample.
const SAMPLE_SIZE: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct FloorEstimate {
    /// Floor depth below the sensor at `x = y = 0`.
    pub height: f64,
    /// Angle between the floor normal and the vertical axis, in degrees.
    pub tilt_degrees: f64,
    /// Candidates that agreed with the fitted plane.
    pub inliers: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct FloorEstimator {
    threshold: f64,
}

impl FloorEstimator {
    /// `threshold` is the floor band half-width `δ` in meters.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold as f64,
        }
    }

    /// Estimate the floor from `plane` points.
    ///
    /// Returns `None` for an empty input. When the candidates cannot define a
    /// plane the anchor depth is used with zero tilt.
    pub fn estimate(&self, plane: &PointCloud, fitter: &mut dyn PlaneFitter) -> Option<FloorEstimate> {
        if plane.is_empty() {
            return None;
        }

        let mut depths: Vec<f64> = plane.z.iter().map(|&z| z as f64).collect();
        let anchor = (percentile(&mut depths, ANCHOR_PERCENTILE) * 1000.0).round() / 1000.0;

        let mask: Vec<bool> = plane
            .z
            .iter()
            .map(|&z| (z as f64 - anchor).abs() < self.threshold)
            .collect();
        let candidates = plane.select_mask(&mask);

        let estimate = fitter
            .fit_plane(&candidates, self.threshold / 2.0, SAMPLE_SIZE, candidates.len() * 2)
            .filter(|model| model.c.abs() > f64::EPSILON)
            .map(|model| FloorEstimate {
                height: -model.d / model.c,
                tilt_degrees: model.tilt_degrees(),
                inliers: model.inlier_count(),
            });

        let estimate = match estimate {
            Some(estimate) => estimate,
            None => {
                warn!(
                    "floor plane fit failed on {} candidates, using anchor depth {:.3} m",
                    candidates.len(),
                    anchor
                );
                FloorEstimate {
                    height: anchor,
                    tilt_degrees: 0.0,
                    inliers: candidates.len(),
                }
            }
        };

        info!(
            "detected floor height {:.6} m, angle with vertical {:.3} degrees",
            estimate.height, estimate.tilt_degrees
        );
        Some(estimate)
    }
}

/// Percentile with linear interpolation between closest ranks.
///
/// `values` is reordered. Panics on an empty slice.
fn percentile(values: &mut [f64], pct: f64) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PlaneModel, RansacPlaneFitter};

    /// Fitter that returns a fixed horizontal plane at `depth`.
    struct FixedPlane {
        depth: f64,
        calls: Vec<(usize, f64, usize)>,
    }

    impl PlaneFitter for FixedPlane {
        fn fit_plane(
            &mut self,
            cloud: &PointCloud,
            distance_threshold: f64,
            _sample_size: usize,
            iterations: usize,
        ) -> Option<PlaneModel> {
            self.calls.push((cloud.len(), distance_threshold, iterations));
            Some(PlaneModel {
                a: 0.0,
                b: 0.0,
                c: 1.0,
                d: -self.depth,
                inliers: vec![true; cloud.len()],
            })
        }
    }

    fn scene() -> PointCloud {
        let mut cloud = PointCloud::new();
        // floor at 2.0m covering most of the scan
        for i in 0..40 {
            for j in 0..40 {
                cloud.push([i as f32 * 0.05 - 1.0, j as f32 * 0.05 - 1.0, 2.0]);
            }
        }
        // box top at 1.4m
        for i in 0..8 {
            for j in 0..8 {
                cloud.push([i as f32 * 0.05, j as f32 * 0.05, 1.4]);
            }
        }
        cloud
    }

    #[test]
    fn test_percentile_interpolates() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&mut values, 50.0), 3.0);
        assert!((percentile(&mut values, 90.0) - 4.6).abs() < 1e-12);
        assert_eq!(percentile(&mut [7.0], 90.0), 7.0);
    }

    #[test]
    fn test_candidates_and_fit_parameters() {
        let mut fitter = FixedPlane {
            depth: 2.0,
            calls: Vec::new(),
        };
        let estimate = FloorEstimator::new(0.1).estimate(&scene(), &mut fitter).unwrap();
        assert_eq!(estimate.height, 2.0);

        // only floor points are candidates, with 2 × candidates trials
        let (n, dist, iterations) = fitter.calls[0];
        assert_eq!(n, 1600);
        assert!((dist - 0.05).abs() < 1e-9);
        assert_eq!(iterations, 3200);
    }

    #[test]
    fn test_ransac_floor() {
        let mut fitter = RansacPlaneFitter::with_seed(11);
        let estimate = FloorEstimator::new(0.1).estimate(&scene(), &mut fitter).unwrap();
        assert!((estimate.height - 2.0).abs() < 1e-4);
        assert!(estimate.tilt_degrees < 0.1);
    }

    #[test]
    fn test_empty_plane() {
        let mut fitter = RansacPlaneFitter::with_seed(1);
        assert!(FloorEstimator::new(0.1).estimate(&PointCloud::new(), &mut fitter).is_none());
    }

    #[test]
    fn test_degenerate_candidates_fall_back_to_anchor() {
        let mut fitter = RansacPlaneFitter::with_seed(1);
        let cloud = PointCloud::from_xyz(&[[0.0, 0.0, 1.8], [0.1, 0.0, 1.8]]);
        let estimate = FloorEstimator::new(0.1).estimate(&cloud, &mut fitter).unwrap();
        assert!((estimate.height - 1.8).abs() < 1e-6);
        assert_eq!(estimate.tilt_degrees, 0.0);
    }
}
