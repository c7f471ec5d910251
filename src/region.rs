// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    color::ramp_colors,
    geometry::{remove_invalid_and_duplicates, voxel_downsample},
    lidar::{PointCloud, Points},
};
use itertools::izip;

/// Voxel edge used to bound point density while gathering.
pub const GATHER_VOXEL_SIZE: f32 = 0.02;

/// Square scan region under the sensor.
///
/// A point is kept iff `|x| < half_extent`, `|y| < half_extent` and
/// `z > min_depth`, i.e. it lies inside the square and farther from the
/// sensor than `min_depth`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionFilter {
    pub half_extent: f32,
    pub min_depth: f32,
}

impl RegionFilter {
    pub fn new(half_extent: f32, min_depth: f32) -> Self {
        Self {
            half_extent,
            min_depth,
        }
    }

    #[inline]
    pub fn contains(&self, x: f32, y: f32, z: f32) -> bool {
        x.abs() < self.half_extent && y.abs() < self.half_extent && z > self.min_depth
    }

    /// Filter a raw batch, coloring each point by its normalized intensity.
    ///
    /// Intensity is normalized over the whole batch before region filtering.
    /// Non-finite points and exact duplicates are dropped.
    pub fn apply(&self, batch: &Points) -> PointCloud {
        let colors = ramp_colors(&batch.intensity);

        let mut cloud = PointCloud::new();
        for (&x, &y, &z, &color) in izip!(&batch.x, &batch.y, &batch.z, &colors) {
            if self.contains(x, y, z) {
                cloud.push_colored([x, y, z], color);
            }
        }
        remove_invalid_and_duplicates(&cloud)
    }
}

/// Running collection for one collection pass.
///
/// Each filtered batch is merged into the collection which is then voxel
/// downsampled, so density stays bounded however many batches are gathered.
#[derive(Debug, Default)]
pub struct Gathered {
    cloud: PointCloud,
}

impl Gathered {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, batch: &PointCloud) {
        self.cloud.append(batch);
        self.cloud = voxel_downsample(&self.cloud, GATHER_VOXEL_SIZE);
    }

    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    pub fn into_cloud(self) -> PointCloud {
        self.cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds() {
        let filter = RegionFilter::new(1.5, 0.5);
        let mut batch = Points::default();
        batch.push(0.0, 0.0, 1.0, 10.0); // inside
        batch.push(1.5, 0.0, 1.0, 10.0); // |x| == L
        batch.push(0.0, -1.6, 1.0, 10.0); // |y| > L
        batch.push(0.0, 0.0, 0.5, 10.0); // z == T
        batch.push(-1.49, 1.49, 0.51, 20.0); // inside, near corner
        batch.push(f32::NAN, 0.0, 1.0, 10.0);
        batch.push(0.0, 0.0, 1.0, 30.0); // duplicate position

        let cloud = filter.apply(&batch);
        assert_eq!(cloud.len(), 2);
        assert!(cloud.has_colors());
        for i in 0..cloud.len() {
            let [x, y, z] = cloud.point(i);
            assert!(filter.contains(x, y, z));
        }
    }

    #[test]
    fn test_region_empty_batch() {
        let filter = RegionFilter::new(1.5, 0.5);
        assert!(filter.apply(&Points::default()).is_empty());
    }

    #[test]
    fn test_gather_downsamples_repeated_scans() {
        let filter = RegionFilter::new(1.5, 0.5);
        let mut batch = Points::default();
        for i in 0..10 {
            batch.push(i as f32 * 0.1, 0.0, 1.0, i as f32);
        }

        let mut gathered = Gathered::new();
        gathered.add(&filter.apply(&batch));
        gathered.add(&filter.apply(&batch));
        assert_eq!(gathered.len(), 10);

        let cloud = gathered.into_cloud();
        assert!(cloud.has_colors());
    }
}
