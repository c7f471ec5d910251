// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common point types and error handling.
//!
//! Both point containers use a structure-of-arrays (SoA) layout. Coordinates
//! are in the sensor frame, in meters, with the z axis pointing down (away
//! from the sensor), so larger z values are closer to the floor.

use std::fmt;

/// Raw point batch as produced by a [`crate::source::PointBatchSource`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Points {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub intensity: Vec<f32>,
}

impl Points {
    /// Create an empty batch with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            intensity: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, x: f32, y: f32, z: f32, intensity: f32) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        self.intensity.push(intensity);
    }

    /// Append all points of `other` to this batch.
    pub fn extend(&mut self, other: &Points) {
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);
        self.intensity.extend_from_slice(&other.intensity);
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Point collection used by the measurement pipeline.
///
/// `colors` is either empty or holds exactly one RGB triple (0..=1) per
/// point. Every operation that selects or merges points keeps the colors
/// aligned with the coordinates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub colors: Vec<[f32; 3]>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an uncolored cloud from `[x, y, z]` triples.
    pub fn from_xyz(points: &[[f32; 3]]) -> Self {
        let mut cloud = Self::default();
        for p in points {
            cloud.x.push(p[0]);
            cloud.y.push(p[1]);
            cloud.z.push(p[2]);
        }
        cloud
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty() && self.colors.len() == self.x.len()
    }

    #[inline]
    pub fn point(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    pub fn push(&mut self, p: [f32; 3]) {
        self.x.push(p[0]);
        self.y.push(p[1]);
        self.z.push(p[2]);
    }

    pub fn push_colored(&mut self, p: [f32; 3], color: [f32; 3]) {
        self.push(p);
        self.colors.push(color);
    }

    /// New cloud holding the points at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let colored = self.has_colors();
        let mut out = Self {
            x: Vec::with_capacity(indices.len()),
            y: Vec::with_capacity(indices.len()),
            z: Vec::with_capacity(indices.len()),
            colors: Vec::with_capacity(if colored { indices.len() } else { 0 }),
        };
        for &i in indices {
            out.x.push(self.x[i]);
            out.y.push(self.y[i]);
            out.z.push(self.z[i]);
            if colored {
                out.colors.push(self.colors[i]);
            }
        }
        out
    }

    /// New cloud holding the points whose mask entry is `true`.
    pub fn select_mask(&self, mask: &[bool]) -> Self {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        self.select(&indices)
    }

    /// Coordinates only; colors are dropped.
    pub fn xyz_only(&self) -> Self {
        Self {
            x: self.x.clone(),
            y: self.y.clone(),
            z: self.z.clone(),
            colors: Vec::new(),
        }
    }

    /// Append `other`. Colors survive only if both sides carry them.
    pub fn append(&mut self, other: &PointCloud) {
        let colored = (self.is_empty() || self.has_colors()) && other.has_colors();
        if !colored {
            self.colors.clear();
        }
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);
        if colored {
            self.colors.extend_from_slice(&other.colors);
        }
    }
}

/// Common error type for the measurement pipeline and the result relay.
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket operations)
    Io(std::io::Error),
    /// Shape error from ndarray operations
    Shape(ndarray::ShapeError),
    /// Configuration error, fatal at startup
    Config(String),
    /// History window larger than the smoothing table supports
    HistoryWindow(usize),
    /// Sensor start/stop/read failure
    Sensor(String),
    /// Malformed frame on the relay protocol
    Protocol(String),
    /// Point matrix column count other than 3, 4 or 6
    UnsupportedColumns(u32),
    /// Visualization backend failure
    Render(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Shape(err) => write!(f, "shape error: {}", err),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::HistoryWindow(size) => {
                write!(f, "history window size {} outside 1..=6", size)
            }
            Error::Sensor(msg) => write!(f, "sensor error: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::UnsupportedColumns(cols) => write!(f, "unsupported column count: {}", cols),
            Error::Render(msg) => write!(f, "render error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_keeps_colors_aligned() {
        let mut cloud = PointCloud::new();
        cloud.push_colored([0.0, 0.0, 1.0], [1.0, 0.0, 0.0]);
        cloud.push_colored([1.0, 0.0, 1.0], [0.0, 1.0, 0.0]);
        cloud.push_colored([2.0, 0.0, 1.0], [0.0, 0.0, 1.0]);

        let picked = cloud.select(&[2, 0]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.x, vec![2.0, 0.0]);
        assert_eq!(picked.colors, vec![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]);

        let masked = cloud.select_mask(&[false, true, false]);
        assert_eq!(masked.point(0), [1.0, 0.0, 1.0]);
        assert_eq!(masked.colors, vec![[0.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_append_drops_colors_on_mismatch() {
        let mut colored = PointCloud::new();
        colored.push_colored([0.0, 0.0, 1.0], [1.0, 1.0, 1.0]);
        let plain = PointCloud::from_xyz(&[[1.0, 1.0, 1.0]]);

        colored.append(&plain);
        assert_eq!(colored.len(), 2);
        assert!(!colored.has_colors());

        let mut empty = PointCloud::new();
        let mut other = PointCloud::new();
        other.push_colored([0.0, 0.0, 1.0], [0.5, 0.5, 0.5]);
        empty.append(&other);
        assert!(empty.has_colors());
    }
}
