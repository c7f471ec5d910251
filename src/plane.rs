// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    geometry::{estimate_normals, remove_radius_outliers},
    lidar::PointCloud,
};
use tracing::instrument;

/// Neighbors used for normal estimation.
pub const NORMAL_NEIGHBORS: usize = 66;
/// Radius outlier filter applied around the normal filter.
pub const OUTLIER_MIN_NEIGHBORS: usize = 2;
pub const OUTLIER_RADIUS: f32 = 0.1;

/// Fewest plane points a collection needs to be usable.
pub const MIN_PLANE_POINTS: usize = 3;

/// Extracts near-horizontal surfaces (floor, cargo tops) from a collection.
#[derive(Clone, Copy, Debug)]
pub struct PlaneExtractor {
    cos_threshold: f32,
}

impl PlaneExtractor {
    /// `degrees_threshold` is the largest angle allowed between a point
    /// normal and the vertical axis.
    pub fn new(degrees_threshold: f32) -> Self {
        Self {
            cos_threshold: degrees_threshold.to_radians().cos(),
        }
    }

    /// Returns the plane points without colors, possibly empty.
    #[instrument(skip_all, fields(n = cloud.len()))]
    pub fn extract(&self, cloud: &PointCloud) -> PointCloud {
        let cloud = remove_radius_outliers(&cloud.xyz_only(), OUTLIER_MIN_NEIGHBORS, OUTLIER_RADIUS);
        if cloud.len() < MIN_PLANE_POINTS {
            return PointCloud::new();
        }

        let normals = estimate_normals(&cloud, NORMAL_NEIGHBORS);
        let mask: Vec<bool> = normals.iter().map(|n| n[2].abs() > self.cos_threshold).collect();
        let horizontal = cloud.select_mask(&mask);

        remove_radius_outliers(&horizontal, OUTLIER_MIN_NEIGHBORS, OUTLIER_RADIUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_floor_drops_wall() {
        let mut cloud = PointCloud::new();
        // floor at depth 2m
        for i in 0..30 {
            for j in 0..30 {
                cloud.push([i as f32 * 0.03 - 0.45, j as f32 * 0.03 - 0.45, 2.0]);
            }
        }
        // vertical wall well away from the floor patch
        for i in 0..30 {
            for k in 0..30 {
                cloud.push([1.0, i as f32 * 0.03 - 0.45, 1.0 + k as f32 * 0.03]);
            }
        }

        let planes = PlaneExtractor::new(10.0).extract(&cloud);
        assert!(planes.len() > 700, "kept {}", planes.len());
        // floor interior survives, wall interior is gone
        let wall = planes.x.iter().filter(|&&x| (x - 1.0).abs() < 1e-6).count();
        assert!(wall < 150, "wall points {}", wall);
        assert!(!planes.has_colors());
    }

    #[test]
    fn test_too_few_points_is_empty() {
        let cloud = PointCloud::from_xyz(&[[0.0, 0.0, 1.0], [0.01, 0.0, 1.0]]);
        assert!(PlaneExtractor::new(10.0).extract(&cloud).is_empty());
        assert!(PlaneExtractor::new(10.0).extract(&PointCloud::new()).is_empty());
    }
}
