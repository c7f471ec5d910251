// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Multi-collection height grid.
//!
//! Cargo points from every collection of a cycle are binned into square XY
//! cells spanning the union bounding box. Each collection contributes at
//! most one height per cell (its highest point above the floor), and a cell
//! only counts once at least `min_valid_collections` collections agree it
//! holds cargo. Single-scan noise and transient occlusions therefore never
//! reach the totals.

use crate::lidar::PointCloud;
use itertools::izip;
use ndarray::Array2;
use tracing::instrument;

/// Aggregate metrics over the valid cells of one cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridSummary {
    pub volume: f64,
    pub area: f64,
    /// Highest averaged cell height, 0 when no cell is valid.
    pub max_height: f64,
    /// Mean averaged cell height, 0 when no cell is valid.
    pub mean_height: f64,
    /// XY centre of the highest cell; the first one in scan order on ties.
    pub max_cell_xy: (f64, f64),
    pub valid_cells: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridParams {
    /// Cell edge length in meters.
    pub grid_size: f32,
    pub area_scale: f32,
    pub height_scale: f32,
    pub min_valid_collections: u32,
}

/// Per-cell accumulation of `(touch_count, height_sum)` over the collections
/// of one cycle, stored densely by `(gx, gy)`.
#[derive(Debug)]
pub struct GridAccumulator {
    params: GridParams,
    min_x: f64,
    min_y: f64,
    counts: Array2<u32>,
    sums: Array2<f64>,
    /// Scratch: this collection's per-cell max height, NaN when untouched.
    scratch: Array2<f64>,
}

impl GridAccumulator {
    /// Size the grid from the XY bounding box of all non-empty collections.
    ///
    /// Returns `None` when every collection is empty.
    pub fn new(params: GridParams, collections: &[PointCloud]) -> Option<Self> {
        let mut bounds: Option<[f32; 4]> = None;
        for cloud in collections.iter().filter(|c| !c.is_empty()) {
            for (&x, &y) in cloud.x.iter().zip(&cloud.y) {
                let b = bounds.get_or_insert([x, x, y, y]);
                b[0] = b[0].min(x);
                b[1] = b[1].max(x);
                b[2] = b[2].min(y);
                b[3] = b[3].max(y);
            }
        }
        let [min_x, max_x, min_y, max_y] = bounds?;

        let g = params.grid_size as f64;
        // an axis with no extent has no cells
        let cells = |extent: f64| (extent / g).ceil() as usize;
        let shape = (
            cells(max_x as f64 - min_x as f64),
            cells(max_y as f64 - min_y as f64),
        );

        Some(Self {
            params,
            min_x: min_x as f64,
            min_y: min_y as f64,
            counts: Array2::zeros(shape),
            sums: Array2::zeros(shape),
            scratch: Array2::from_elem(shape, f64::NAN),
        })
    }

    /// Grid dimensions `(nx, ny)`.
    pub fn dims(&self) -> (usize, usize) {
        self.counts.dim()
    }

    /// Cell index of an XY position, `None` outside the grid. A position
    /// exactly on the far edge of the bounding box is outside.
    fn cell(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        let (nx, ny) = self.dims();
        let g = self.params.grid_size as f64;
        let fx = (x as f64 - self.min_x) / g;
        let fy = (y as f64 - self.min_y) / g;
        if !(fx >= 0.0 && fy >= 0.0) {
            return None;
        }
        let gx = fx as usize;
        let gy = fy as usize;
        (gx < nx && gy < ny).then_some((gx, gy))
    }

    /// Fold one collection's cargo points into the grid against `floor`.
    ///
    /// Within each cell only the highest point with positive height
    /// `floor - z` counts; points at or below the floor are ignored.
    pub fn add_collection(&mut self, cloud: &PointCloud, floor: f64) {
        self.scratch.fill(f64::NAN);
        for (&x, &y, &z) in izip!(&cloud.x, &cloud.y, &cloud.z) {
            let Some(cell) = self.cell(x, y) else {
                continue;
            };
            let h = floor - z as f64;
            if h <= 0.0 {
                continue;
            }
            let slot = &mut self.scratch[cell];
            if slot.is_nan() || h > *slot {
                *slot = h;
            }
        }

        for (count, sum, &h) in izip!(self.counts.iter_mut(), self.sums.iter_mut(), &self.scratch) {
            if !h.is_nan() {
                *count += 1;
                *sum += h;
            }
        }
    }

    /// Averaged height of cell `(gx, gy)` if it is valid.
    pub fn cell_height(&self, gx: usize, gy: usize) -> Option<f64> {
        let n = *self.counts.get((gx, gy))?;
        (n >= self.params.min_valid_collections && n > 0)
            .then(|| self.sums[(gx, gy)] / n as f64 * self.params.height_scale as f64)
    }

    pub fn summarize(&self) -> GridSummary {
        let g = self.params.grid_size as f64;
        let cell_area = g * g * self.params.area_scale as f64;
        let (nx, ny) = self.dims();

        let mut summary = GridSummary::default();
        let mut height_sum = 0.0;
        let mut best: Option<f64> = None;

        for gx in 0..nx {
            for gy in 0..ny {
                let Some(h) = self.cell_height(gx, gy) else {
                    continue;
                };
                summary.volume += h * cell_area;
                summary.area += cell_area;
                summary.valid_cells += 1;
                height_sum += h;

                if best.is_none_or(|b| h > b) {
                    best = Some(h);
                    summary.max_cell_xy = (
                        self.min_x + (gx as f64 + 0.5) * g,
                        self.min_y + (gy as f64 + 0.5) * g,
                    );
                }
            }
        }

        summary.max_height = best.unwrap_or(0.0);
        if summary.valid_cells > 0 {
            summary.mean_height = height_sum / summary.valid_cells as f64;
        }
        summary
    }
}

/// Accumulate every collection against `floor` and summarize.
///
/// Returns `None` when all collections are empty.
#[instrument(skip_all, fields(collections = collections.len()))]
pub fn accumulate(params: GridParams, collections: &[PointCloud], floor: f64) -> Option<GridSummary> {
    let mut grid = GridAccumulator::new(params, collections)?;
    for cloud in collections.iter().filter(|c| !c.is_empty()) {
        grid.add_collection(cloud, floor);
    }
    Some(grid.summarize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_valid: u32) -> GridParams {
        GridParams {
            grid_size: 0.1,
            area_scale: 1.0,
            height_scale: 1.0,
            min_valid_collections: min_valid,
        }
    }

    #[test]
    fn test_all_empty_is_none() {
        assert!(accumulate(params(1), &[PointCloud::new(), PointCloud::new()], 2.0).is_none());
        assert!(accumulate(params(1), &[], 2.0).is_none());
    }

    #[test]
    fn test_cell_max_per_collection() {
        // two points in the same cell, the higher one counts
        let c = PointCloud::from_xyz(&[[0.0, 0.0, 1.5], [0.01, 0.01, 1.2], [0.35, 0.35, 1.9]]);
        let s = accumulate(params(1), &[c], 2.0).unwrap();
        assert_eq!(s.valid_cells, 2);
        assert!((s.max_height - 0.8).abs() < 1e-6);
        assert!((s.area - 0.02).abs() < 1e-9);
        assert!((s.volume - (0.8 + 0.1) * 0.01).abs() < 1e-6);
        assert!((s.max_cell_xy.0 - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_points_below_floor_ignored() {
        let c = PointCloud::from_xyz(&[[0.0, 0.0, 2.1], [0.3, 0.0, 2.0]]);
        let s = accumulate(params(1), &[c], 2.0).unwrap();
        assert_eq!(s.valid_cells, 0);
        assert_eq!(s.max_height, 0.0);
        assert_eq!(s.mean_height, 0.0);
    }

    #[test]
    fn test_consensus_threshold() {
        let a = PointCloud::from_xyz(&[[0.0, 0.0, 1.5], [0.25, 0.25, 1.0]]);
        let b = PointCloud::from_xyz(&[[0.0, 0.0, 1.3]]);
        let s = accumulate(params(2), &[a.clone(), b.clone(), PointCloud::new()], 2.0).unwrap();
        // only cell (0, 0) was seen twice
        assert_eq!(s.valid_cells, 1);
        assert!((s.max_height - 0.6).abs() < 1e-6);
        assert!((s.mean_height - 0.6).abs() < 1e-6);

        let s = accumulate(params(3), &[a, b, PointCloud::new()], 2.0).unwrap();
        assert_eq!(s.valid_cells, 0);
        assert_eq!(s.volume, 0.0);
        assert_eq!(s.area, 0.0);
    }

    #[test]
    fn test_order_invariance() {
        let a = PointCloud::from_xyz(&[[0.0, 0.0, 1.5], [0.25, 0.1, 1.1], [0.4, 0.4, 1.7]]);
        let b = PointCloud::from_xyz(&[[0.02, 0.03, 1.3], [0.26, 0.12, 1.0]]);
        let c = PointCloud::from_xyz(&[[0.41, 0.39, 1.6], [0.05, 0.05, 1.4]]);

        let s1 = accumulate(params(2), &[a.clone(), b.clone(), c.clone()], 2.0).unwrap();
        let s2 = accumulate(params(2), &[c, a, b], 2.0).unwrap();
        assert!((s1.volume - s2.volume).abs() < 1e-12);
        assert!((s1.area - s2.area).abs() < 1e-12);
        assert_eq!(s1.valid_cells, s2.valid_cells);
    }

    #[test]
    fn test_far_edge_point_dropped() {
        // extent exactly two cells; the point at x = 0.2 sits on the far edge
        let c = PointCloud::from_xyz(&[[0.0, 0.05, 1.5], [0.2, 0.0, 1.0]]);
        let grid = GridAccumulator::new(params(1), std::slice::from_ref(&c)).unwrap();
        assert_eq!(grid.dims(), (2, 1));
        let s = accumulate(params(1), &[c], 2.0).unwrap();
        assert_eq!(s.valid_cells, 1);
        assert!((s.max_height - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_zero_extent_has_no_cells() {
        // all points share one x, so the grid has no columns
        let c = PointCloud::from_xyz(&[[0.0, 0.0, 1.0], [0.0, 0.4, 1.0]]);
        let grid = GridAccumulator::new(params(1), std::slice::from_ref(&c)).unwrap();
        assert_eq!(grid.dims().0, 0);
        let s = accumulate(params(1), &[c], 2.0).unwrap();
        assert_eq!(s.valid_cells, 0);
        assert_eq!(s.volume, 0.0);
        assert_eq!(s.area, 0.0);

        let single = PointCloud::from_xyz(&[[0.3, -0.3, 1.0]]);
        assert_eq!(accumulate(params(1), &[single], 2.0).unwrap().valid_cells, 0);
    }

    #[test]
    fn test_max_cell_centre() {
        // the second point is below the floor and only widens the bounds
        let c = PointCloud::from_xyz(&[[0.3, -0.3, 1.0], [0.55, -0.05, 2.5]]);
        let s = accumulate(params(1), &[c], 2.0).unwrap();
        assert_eq!(s.valid_cells, 1);
        assert!((s.max_height - 1.0).abs() < 1e-6);
        assert!((s.max_cell_xy.0 - 0.35).abs() < 1e-6);
        assert!((s.max_cell_xy.1 + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_scales() {
        let c = PointCloud::from_xyz(&[[0.0, 0.0, 1.5], [0.25, 0.25, 2.5]]);
        let p = GridParams {
            area_scale: 2.0,
            height_scale: 3.0,
            ..params(1)
        };
        let s = accumulate(p, &[c], 2.0).unwrap();
        assert!((s.max_height - 1.5).abs() < 1e-6);
        assert!((s.area - 0.02).abs() < 1e-9);
        assert!((s.volume - 0.03).abs() < 1e-6);
    }
}
