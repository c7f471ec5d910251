// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    geometry::{remove_radius_outliers, remove_statistical_outliers},
    lidar::PointCloud,
};
use tracing::instrument;

const RADIUS_MIN_NEIGHBORS: usize = 2;
const RADIUS: f32 = 0.1;
const STATISTICAL_NEIGHBORS: usize = 20;
const STATISTICAL_STD_RATIO: f32 = 2.0;

/// Separates cargo surfaces from the floor.
#[derive(Clone, Copy, Debug)]
pub struct CargoIsolator {
    threshold: f32,
}

impl CargoIsolator {
    /// `threshold` is the floor band `δ`: cargo must sit more than `δ` above
    /// the floor.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Keep plane points with `z < floor - δ`, then denoise.
    ///
    /// An empty result means no cargo was seen in this collection.
    #[instrument(skip_all, fields(n = plane.len(), floor = floor))]
    pub fn isolate(&self, plane: &PointCloud, floor: f32) -> PointCloud {
        let limit = floor - self.threshold;
        let mask: Vec<bool> = plane.z.iter().map(|&z| z < limit).collect();
        let above = plane.select_mask(&mask);
        if above.is_empty() {
            return above;
        }

        let above = remove_radius_outliers(&above, RADIUS_MIN_NEIGHBORS, RADIUS);
        remove_statistical_outliers(&above, STATISTICAL_NEIGHBORS, STATISTICAL_STD_RATIO)
    }
}
