// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point cloud primitives used by the measurement pipeline.
//!
//! - Radius neighbor queries use a 3D spatial hash: space is divided into
//!   voxels of size `radius`, and a query checks the 27 adjacent voxels
//!   (3×3×3), giving O(n) average performance for uniform distributions.
//! - k-nearest-neighbor queries (normals, statistical outliers) use an
//!   R*-tree from `rstar`.
//! - Plane fitting sits behind the [`PlaneFitter`] trait so the stochastic
//!   RANSAC fitter can be swapped for a deterministic one in tests.

use crate::lidar::PointCloud;
use rand::{SeedableRng, rngs::StdRng, seq::index::sample};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use std::collections::{HashMap, HashSet};

// ── Spatial hash (radius queries) ───────────────────────────────────────────

/// 3D spatial hash for O(1) average radius queries.
struct SpatialHash {
    cells: HashMap<(i32, i32, i32), Vec<usize>>,
    inv_cell_size: f32,
}

impl SpatialHash {
    fn build(cloud: &PointCloud, cell_size: f32) -> Self {
        let mut hash = Self {
            cells: HashMap::new(),
            inv_cell_size: 1.0 / cell_size,
        };
        for i in 0..cloud.len() {
            let key = hash.voxel_key(cloud.x[i], cloud.y[i], cloud.z[i]);
            hash.cells.entry(key).or_default().push(i);
        }
        hash
    }

    fn voxel_key(&self, x: f32, y: f32, z: f32) -> (i32, i32, i32) {
        (
            (x * self.inv_cell_size).floor() as i32,
            (y * self.inv_cell_size).floor() as i32,
            (z * self.inv_cell_size).floor() as i32,
        )
    }

    /// Count points strictly closer than `sqrt(radius_sq)` to `q`, the query
    /// point itself included. Stops counting once `limit` is reached.
    fn count_within(&self, cloud: &PointCloud, q: [f32; 3], radius_sq: f32, limit: usize) -> usize {
        let (cx, cy, cz) = self.voxel_key(q[0], q[1], q[2]);
        let mut count = 0;

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(indices) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &idx in indices {
                        let ddx = cloud.x[idx] - q[0];
                        let ddy = cloud.y[idx] - q[1];
                        let ddz = cloud.z[idx] - q[2];
                        if ddx * ddx + ddy * ddy + ddz * ddz < radius_sq {
                            count += 1;
                            if count >= limit {
                                return count;
                            }
                        }
                    }
                }
            }
        }
        count
    }
}

// ── k-nearest-neighbor index ────────────────────────────────────────────────

struct IndexedPoint {
    pos: [f32; 3],
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.pos[0] - point[0];
        let dy = self.pos[1] - point[1];
        let dz = self.pos[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

fn build_tree(cloud: &PointCloud) -> RTree<IndexedPoint> {
    let items = (0..cloud.len())
        .map(|i| IndexedPoint {
            pos: cloud.point(i),
        })
        .collect();
    RTree::bulk_load(items)
}

// ── Filters ─────────────────────────────────────────────────────────────────

/// Drop points with fewer than `min_neighbors` points within `radius`.
///
/// The neighbor count includes the point itself, so `min_neighbors = 2`
/// removes every point that has no other point within `radius`.
pub fn remove_radius_outliers(cloud: &PointCloud, min_neighbors: usize, radius: f32) -> PointCloud {
    if cloud.is_empty() || radius <= 0.0 {
        return cloud.clone();
    }

    let hash = SpatialHash::build(cloud, radius);
    let radius_sq = radius * radius;
    let keep: Vec<usize> = (0..cloud.len())
        .filter(|&i| hash.count_within(cloud, cloud.point(i), radius_sq, min_neighbors) >= min_neighbors)
        .collect();
    cloud.select(&keep)
}

/// Drop points whose mean distance to their `k` nearest neighbors exceeds
/// the cloud-wide mean by more than `std_ratio` standard deviations.
pub fn remove_statistical_outliers(cloud: &PointCloud, k: usize, std_ratio: f32) -> PointCloud {
    let n = cloud.len();
    if n == 0 || k == 0 {
        return cloud.clone();
    }

    let tree = build_tree(cloud);
    let mean_distances: Vec<f64> = (0..n)
        .map(|i| {
            let q = cloud.point(i);
            let mut sum = 0.0f64;
            let mut found = 0usize;
            for neighbor in tree.nearest_neighbor_iter(&q).take(k) {
                sum += (neighbor.distance_2(&q) as f64).sqrt();
                found += 1;
            }
            if found == 0 { 0.0 } else { sum / found as f64 }
        })
        .collect();

    let mean = mean_distances.iter().sum::<f64>() / n as f64;
    let var = if n > 1 {
        mean_distances.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };
    let threshold = mean + std_ratio as f64 * var.sqrt();

    let keep: Vec<usize> = (0..n).filter(|&i| mean_distances[i] <= threshold).collect();
    cloud.select(&keep)
}

/// Drop non-finite points and exact coordinate duplicates, keeping the first
/// occurrence of each position.
pub fn remove_invalid_and_duplicates(cloud: &PointCloud) -> PointCloud {
    let mut seen: HashSet<(u32, u32, u32)> = HashSet::with_capacity(cloud.len());
    let keep: Vec<usize> = (0..cloud.len())
        .filter(|&i| {
            let [x, y, z] = cloud.point(i);
            if !(x.is_finite() && y.is_finite() && z.is_finite()) {
                return false;
            }
            // +0.0 folds -0.0 into 0.0 so both hash to the same key
            seen.insert(((x + 0.0).to_bits(), (y + 0.0).to_bits(), (z + 0.0).to_bits()))
        })
        .collect();
    cloud.select(&keep)
}

/// Bucket points into voxels of edge `voxel_size` and keep one point per
/// occupied voxel: the centroid of its members (and the mean color when the
/// cloud is colored). Output order follows the voxel index order.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f32) -> PointCloud {
    if voxel_size <= 0.0 || cloud.is_empty() {
        return cloud.clone();
    }

    let inv = 1.0 / voxel_size;
    let mut keys: Vec<((i32, i32, i32), usize)> = (0..cloud.len())
        .map(|i| {
            let key = (
                (cloud.x[i] * inv).floor() as i32,
                (cloud.y[i] * inv).floor() as i32,
                (cloud.z[i] * inv).floor() as i32,
            );
            (key, i)
        })
        .collect();
    keys.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let colored = cloud.has_colors();
    let mut out = PointCloud::new();
    let mut start = 0;
    while start < keys.len() {
        let key = keys[start].0;
        let mut end = start;
        let mut sum_p = [0.0f64; 3];
        let mut sum_c = [0.0f64; 3];
        while end < keys.len() && keys[end].0 == key {
            let idx = keys[end].1;
            sum_p[0] += cloud.x[idx] as f64;
            sum_p[1] += cloud.y[idx] as f64;
            sum_p[2] += cloud.z[idx] as f64;
            if colored {
                for (s, c) in sum_c.iter_mut().zip(cloud.colors[idx]) {
                    *s += c as f64;
                }
            }
            end += 1;
        }

        let inv_count = 1.0 / (end - start) as f64;
        let p = [
            (sum_p[0] * inv_count) as f32,
            (sum_p[1] * inv_count) as f32,
            (sum_p[2] * inv_count) as f32,
        ];
        if colored {
            out.push_colored(
                p,
                [
                    (sum_c[0] * inv_count) as f32,
                    (sum_c[1] * inv_count) as f32,
                    (sum_c[2] * inv_count) as f32,
                ],
            );
        } else {
            out.push(p);
        }
        start = end;
    }
    out
}

// ── Normals ─────────────────────────────────────────────────────────────────

/// Estimate a unit normal per point from the covariance of its `k` nearest
/// neighbors (the point itself included).
///
/// The normal is the eigenvector of the smallest eigenvalue. Its sign is not
/// oriented; callers compare against an axis with `abs()`. Points with fewer
/// than three neighbors get `[0, 0, 1]`.
pub fn estimate_normals(cloud: &PointCloud, k: usize) -> Vec<[f32; 3]> {
    if cloud.is_empty() {
        return Vec::new();
    }

    let tree = build_tree(cloud);
    let mut neighbors: Vec<[f32; 3]> = Vec::with_capacity(k);

    (0..cloud.len())
        .map(|i| {
            let q = cloud.point(i);
            neighbors.clear();
            neighbors.extend(tree.nearest_neighbor_iter(&q).take(k).map(|p| p.pos));
            if neighbors.len() < 3 {
                return [0.0, 0.0, 1.0];
            }
            let (eigenvalues, eigenvectors) = sym3x3_eigen(covariance(&neighbors).1);
            eigenvectors[smallest_eigenvalue_index(eigenvalues)]
        })
        .collect()
}

/// Centroid and packed covariance `[xx, xy, xz, yy, yz, zz]` of a point set.
fn covariance(points: &[[f32; 3]]) -> ([f64; 3], [f64; 6]) {
    let inv_n = 1.0 / points.len() as f64;
    let mut c = [0.0f64; 3];
    for p in points {
        c[0] += p[0] as f64;
        c[1] += p[1] as f64;
        c[2] += p[2] as f64;
    }
    for v in c.iter_mut() {
        *v *= inv_n;
    }

    let mut cov = [0.0f64; 6];
    for p in points {
        let dx = p[0] as f64 - c[0];
        let dy = p[1] as f64 - c[1];
        let dz = p[2] as f64 - c[2];
        cov[0] += dx * dx;
        cov[1] += dx * dy;
        cov[2] += dx * dz;
        cov[3] += dy * dy;
        cov[4] += dy * dz;
        cov[5] += dz * dz;
    }
    for v in cov.iter_mut() {
        *v *= inv_n;
    }
    (c, cov)
}

fn smallest_eigenvalue_index(eigenvalues: [f64; 3]) -> usize {
    if eigenvalues[0] <= eigenvalues[1] && eigenvalues[0] <= eigenvalues[2] {
        0
    } else if eigenvalues[1] <= eigenvalues[2] {
        1
    } else {
        2
    }
}

/// Eigendecomposition of a 3×3 symmetric matrix.
///
/// Uses the analytical method described by Smith (1961) / Kopp (2008).
fn sym3x3_eigen(cov: [f64; 6]) -> ([f64; 3], [[f32; 3]; 3]) {
    let [a11, a12, a13, a22, a23, a33] = cov;

    let q = (a11 + a22 + a33) / 3.0;
    let p1 = a12 * a12 + a13 * a13 + a23 * a23;

    let eigenvalues = if p1 < 1e-30 {
        let mut evs = [a11, a22, a33];
        evs.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        evs
    } else {
        let p2 = (a11 - q) * (a11 - q) + (a22 - q) * (a22 - q) + (a33 - q) * (a33 - q) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let inv_p = 1.0 / p;

        let b11 = (a11 - q) * inv_p;
        let b12 = a12 * inv_p;
        let b13 = a13 * inv_p;
        let b22 = (a22 - q) * inv_p;
        let b23 = a23 * inv_p;
        let b33 = (a33 - q) * inv_p;

        let half_det = (b11 * b22 * b33 + 2.0 * b12 * b13 * b23
            - b11 * b23 * b23
            - b22 * b13 * b13
            - b33 * b12 * b12)
            / 2.0;

        let phi = half_det.clamp(-1.0, 1.0).acos() / 3.0;

        let e1 = q + 2.0 * p * phi.cos();
        let e3 = q + 2.0 * p * (phi + std::f64::consts::TAU / 3.0).cos();
        let e2 = 3.0 * q - e1 - e3;
        [e1, e2, e3]
    };

    let eigenvectors = [
        eigenvector_for(cov, eigenvalues[0]),
        eigenvector_for(cov, eigenvalues[1]),
        eigenvector_for(cov, eigenvalues[2]),
    ];

    (eigenvalues, eigenvectors)
}

/// Compute eigenvector for a 3×3 symmetric matrix at a given eigenvalue.
fn eigenvector_for(mat: [f64; 6], lambda: f64) -> [f32; 3] {
    let m00 = mat[0] - lambda;
    let m01 = mat[1];
    let m02 = mat[2];
    let m11 = mat[3] - lambda;
    let m12 = mat[4];
    let m22 = mat[5] - lambda;

    let v0x = m01 * m12 - m02 * m11;
    let v0y = m02 * m01 - m00 * m12;
    let v0z = m00 * m11 - m01 * m01;

    let v1x = m01 * m22 - m02 * m12;
    let v1y = m02 * m02 - m00 * m22;
    let v1z = m00 * m12 - m01 * m02;

    let v2x = m11 * m22 - m12 * m12;
    let v2y = m12 * m02 - m01 * m22;
    let v2z = m01 * m12 - m11 * m02;

    let mag0 = v0x * v0x + v0y * v0y + v0z * v0z;
    let mag1 = v1x * v1x + v1y * v1y + v1z * v1z;
    let mag2 = v2x * v2x + v2y * v2y + v2z * v2z;

    let (vx, vy, vz, mag) = if mag0 >= mag1 && mag0 >= mag2 {
        (v0x, v0y, v0z, mag0)
    } else if mag1 >= mag2 {
        (v1x, v1y, v1z, mag1)
    } else {
        (v2x, v2y, v2z, mag2)
    };

    if mag < 1e-30 {
        return [0.0, 0.0, 1.0];
    }

    let inv = 1.0 / mag.sqrt();
    [(vx * inv) as f32, (vy * inv) as f32, (vz * inv) as f32]
}

// ── Plane fitting ───────────────────────────────────────────────────────────

/// Plane `a·x + b·y + c·z + d = 0` with a unit normal `(a, b, c)`.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaneModel {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    /// One flag per input point; `true` for points within the fit distance.
    pub inliers: Vec<bool>,
}

impl PlaneModel {
    /// Signed distance from `p` to the plane.
    pub fn distance(&self, p: [f32; 3]) -> f64 {
        self.a * p[0] as f64 + self.b * p[1] as f64 + self.c * p[2] as f64 + self.d
    }

    /// Angle in degrees between the plane normal and the vertical axis.
    pub fn tilt_degrees(&self) -> f64 {
        self.c.abs().clamp(0.0, 1.0).acos().to_degrees()
    }

    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&v| v).count()
    }
}

/// Robust plane fitting.
///
/// Returns `None` when the input cannot define a plane (fewer than
/// `sample_size` points, or every sample is degenerate).
pub trait PlaneFitter {
    fn fit_plane(
        &mut self,
        cloud: &PointCloud,
        distance_threshold: f64,
        sample_size: usize,
        iterations: usize,
    ) -> Option<PlaneModel>;
}

/// Success probability used for adaptive early termination.
const RANSAC_CONFIDENCE: f64 = 0.999_999_99;

/// Consensus (RANSAC) plane fitter.
///
/// Each trial fits a plane through `sample_size` random points and counts
/// inliers within `distance_threshold`; the best model is refined by a
/// least-squares fit over its inliers. The trial budget shrinks once the
/// observed inlier ratio makes further trials unnecessary.
pub struct RansacPlaneFitter {
    rng: StdRng,
}

impl RansacPlaneFitter {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Fitter with a fixed seed, for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RansacPlaneFitter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaneFitter for RansacPlaneFitter {
    fn fit_plane(
        &mut self,
        cloud: &PointCloud,
        distance_threshold: f64,
        sample_size: usize,
        iterations: usize,
    ) -> Option<PlaneModel> {
        let n = cloud.len();
        let sample_size = sample_size.max(3);
        if n < sample_size {
            return None;
        }

        let mut best: Option<(usize, [f64; 4])> = None;
        let mut budget = iterations.max(1);
        let mut trial = 0;
        let mut sample_points = Vec::with_capacity(sample_size);

        while trial < budget {
            trial += 1;
            sample_points.clear();
            sample_points.extend(sample(&mut self.rng, n, sample_size).into_iter().map(|i| cloud.point(i)));

            let Some(plane) = plane_through(&sample_points) else {
                continue;
            };
            let count = count_inliers(cloud, plane, distance_threshold);
            if best.is_none_or(|(c, _)| count > c) {
                best = Some((count, plane));

                let ratio = count as f64 / n as f64;
                let miss = 1.0 - ratio.powi(sample_size as i32);
                if miss <= 0.0 {
                    break;
                }
                let needed = ((1.0 - RANSAC_CONFIDENCE).ln() / miss.ln()).ceil();
                if needed.is_finite() && needed >= 0.0 {
                    budget = budget.min(needed as usize);
                }
            }
        }

        let (_, plane) = best?;
        let inlier_points: Vec<[f32; 3]> = (0..n)
            .map(|i| cloud.point(i))
            .filter(|&p| plane_distance(plane, p).abs() < distance_threshold)
            .collect();
        let plane = least_squares_plane(&inlier_points).unwrap_or(plane);

        let inliers = (0..n)
            .map(|i| plane_distance(plane, cloud.point(i)).abs() < distance_threshold)
            .collect();
        Some(PlaneModel {
            a: plane[0],
            b: plane[1],
            c: plane[2],
            d: plane[3],
            inliers,
        })
    }
}

fn plane_distance(plane: [f64; 4], p: [f32; 3]) -> f64 {
    plane[0] * p[0] as f64 + plane[1] * p[1] as f64 + plane[2] * p[2] as f64 + plane[3]
}

fn count_inliers(cloud: &PointCloud, plane: [f64; 4], distance_threshold: f64) -> usize {
    (0..cloud.len())
        .filter(|&i| plane_distance(plane, cloud.point(i)).abs() < distance_threshold)
        .count()
}

/// Plane through the first three points of `points`, or `None` if they are
/// collinear.
fn plane_through(points: &[[f32; 3]]) -> Option<[f64; 4]> {
    let p0 = points[0].map(f64::from);
    let p1 = points[1].map(f64::from);
    let p2 = points[2].map(f64::from);
    let u = [p1[0] - p0[0], p1[1] - p0[1], p1[2] - p0[2]];
    let v = [p2[0] - p0[0], p2[1] - p0[1], p2[2] - p0[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let mag = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if mag < 1e-12 {
        return None;
    }
    let n = [n[0] / mag, n[1] / mag, n[2] / mag];
    let d = -(n[0] * p0[0] + n[1] * p0[1] + n[2] * p0[2]);
    Some([n[0], n[1], n[2], d])
}

/// Total-least-squares plane through the centroid of `points`.
fn least_squares_plane(points: &[[f32; 3]]) -> Option<[f64; 4]> {
    if points.len() < 3 {
        return None;
    }
    let (c, cov) = covariance(points);
    let (eigenvalues, eigenvectors) = sym3x3_eigen(cov);
    let n = eigenvectors[smallest_eigenvalue_index(eigenvalues)].map(f64::from);
    let mag = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if mag < 1e-12 {
        return None;
    }
    let n = [n[0] / mag, n[1] / mag, n[2] / mag];
    let d = -(n[0] * c[0] + n[1] * c[1] + n[2] * c[2]);
    Some([n[0], n[1], n[2], d])
}
