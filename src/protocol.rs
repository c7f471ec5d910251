// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Result frame codec for the visualization relay.
//!
//! One frame per TCP connection, all integers and floats big-endian:
//!
//! | field      | type                        |
//! |------------|-----------------------------|
//! | `meta_len` | `u32`, 28                   |
//! | `meta`     | 5 × `f32` metrics, 2 × `u32` `(n_points, n_cols)` |
//! | `data_len` | `u32`, `n_points × n_cols × 4` |
//! | `data`     | `n_points × n_cols` `f32`, row-major |
//!
//! The metrics are `(volume, area, max_height, mean_height, lowest_z)`;
//! `n_cols` is 3 (xyz), 4 (xyz + intensity) or 6 (xyz + rgb).

use crate::{
    lidar::{Error, PointCloud},
    metrics::MetricsResult,
};
use ndarray::Array2;
use std::io::{Read, Write};

/// Size of the metadata block written by [`Frame::encode`].
pub const META_LEN: usize = 28;

/// Upper bound on a frame's point payload.
pub const MAX_DATA_LEN: usize = 256 * 1024 * 1024;

/// Upper bound on a peer's metadata block.
const MAX_META_LEN: usize = 4096;

/// Column layouts accepted on the wire.
pub const XYZ: u32 = 3;
pub const XYZI: u32 = 4;
pub const XYZRGB: u32 = 6;

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub volume: f32,
    pub area: f32,
    pub max_height: f32,
    pub mean_height: f32,
    pub lowest_z: f32,
    /// `(n_points, n_cols)`.
    pub points: Array2<f32>,
}

impl Frame {
    /// Frame carrying `result` and `cloud`, as xyz+rgb when the cloud is
    /// colored and xyz otherwise.
    pub fn new(result: &MetricsResult, cloud: &PointCloud) -> Self {
        let n_cols = (if cloud.has_colors() { XYZRGB } else { XYZ }) as usize;
        let mut points = Array2::zeros((cloud.len(), n_cols));
        for (i, mut row) in points.rows_mut().into_iter().enumerate() {
            row[0] = cloud.x[i];
            row[1] = cloud.y[i];
            row[2] = cloud.z[i];
            if n_cols == XYZRGB as usize {
                row[3] = cloud.colors[i][0];
                row[4] = cloud.colors[i][1];
                row[5] = cloud.colors[i][2];
            }
        }

        Self {
            volume: result.volume as f32,
            area: result.area as f32,
            max_height: result.max_height as f32,
            mean_height: result.mean_height as f32,
            lowest_z: result.lowest_z as f32,
            points,
        }
    }

    pub fn n_points(&self) -> usize {
        self.points.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.points.ncols()
    }

    pub fn encode_meta(&self) -> [u8; META_LEN] {
        let mut meta = [0u8; META_LEN];
        let fields = [self.volume, self.area, self.max_height, self.mean_height, self.lowest_z];
        for (chunk, v) in meta.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&v.to_be_bytes());
        }
        meta[20..24].copy_from_slice(&(self.n_points() as u32).to_be_bytes());
        meta[24..28].copy_from_slice(&(self.n_cols() as u32).to_be_bytes());
        meta
    }

    pub fn encode_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.points.len() * 4);
        // iter() walks in logical (row-major) order whatever the memory layout
        for v in self.points.iter() {
            data.extend_from_slice(&v.to_be_bytes());
        }
        data
    }

    /// Complete frame: `meta_len`, meta, `data_len`, data.
    pub fn encode(&self) -> Vec<u8> {
        let meta = self.encode_meta();
        let data = self.encode_data();
        let mut buf = Vec::with_capacity(8 + meta.len() + data.len());
        buf.extend_from_slice(&(META_LEN as u32).to_be_bytes());
        buf.extend_from_slice(&meta);
        buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&data);
        buf
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(&self.encode())?;
        w.flush()?;
        Ok(())
    }

    /// Read one frame with exact reads.
    ///
    /// Metadata longer than [`META_LEN`] is accepted and the extra bytes are
    /// ignored. A connection closed mid-frame surfaces as [`Error::Io`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let meta_len = read_u32(r)? as usize;
        if !(META_LEN..=MAX_META_LEN).contains(&meta_len) {
            return Err(Error::Protocol(format!("metadata length {} out of range", meta_len)));
        }
        let mut meta = vec![0u8; meta_len];
        r.read_exact(&mut meta)?;

        let f = |i: usize| f32::from_be_bytes([meta[i], meta[i + 1], meta[i + 2], meta[i + 3]]);
        let u = |i: usize| u32::from_be_bytes([meta[i], meta[i + 1], meta[i + 2], meta[i + 3]]);
        let n_points = u(20);
        let n_cols = u(24);
        if !matches!(n_cols, XYZ | XYZI | XYZRGB) {
            return Err(Error::UnsupportedColumns(n_cols));
        }

        let data_len = read_u32(r)? as usize;
        let expected = (n_points as usize)
            .checked_mul(n_cols as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| Error::Protocol(format!("{} points overflow", n_points)))?;
        if data_len != expected {
            return Err(Error::Protocol(format!(
                "data length {} does not match {} x {} points",
                data_len, n_points, n_cols
            )));
        }
        if data_len > MAX_DATA_LEN {
            return Err(Error::Protocol(format!("data length {} too large", data_len)));
        }

        let mut data = vec![0u8; data_len];
        r.read_exact(&mut data)?;
        let values: Vec<f32> = data
            .chunks_exact(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let points = Array2::from_shape_vec((n_points as usize, n_cols as usize), values)?;

        Ok(Self {
            volume: f(0),
            area: f(4),
            max_height: f(8),
            mean_height: f(12),
            lowest_z: f(16),
            points,
        })
    }
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Cursor;

    fn sample() -> Frame {
        Frame {
            volume: 1.5,
            area: 2.0,
            max_height: 0.3,
            mean_height: 0.1,
            lowest_z: 1.2,
            points: array![[0.1, -0.2, 1.1, 40.0], [0.5, 0.25, 1.3, 200.0]],
        }
    }

    #[test]
    fn test_frame_layout() {
        let frame = sample();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 4 + 28 + 4 + 32);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 28]);
        assert_eq!(&bytes[4..8], &1.5f32.to_be_bytes());
        assert_eq!(&bytes[24..28], &[0, 0, 0, 2]);
        assert_eq!(&bytes[28..32], &[0, 0, 0, 4]);
        assert_eq!(&bytes[32..36], &[0, 0, 0, 32]);
        assert_eq!(&bytes[36..40], &0.1f32.to_be_bytes());
        assert_eq!(&bytes[64..68], &200.0f32.to_be_bytes());
    }

    #[test]
    fn test_decode_ignores_extra_meta() {
        let frame = sample();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&32u32.to_be_bytes());
        bytes.extend_from_slice(&frame.encode_meta());
        bytes.extend_from_slice(&[0xAA; 4]);
        bytes.extend_from_slice(&32u32.to_be_bytes());
        bytes.extend_from_slice(&frame.encode_data());

        let decoded = Frame::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let frame = sample();
        let mut bytes = frame.encode();
        bytes[31] = 5; // n_cols
        assert!(matches!(
            Frame::read_from(&mut Cursor::new(bytes)),
            Err(Error::UnsupportedColumns(5))
        ));

        let mut bytes = frame.encode();
        bytes[35] = 28; // data_len
        assert!(matches!(Frame::read_from(&mut Cursor::new(bytes)), Err(Error::Protocol(_))));

        let mut bytes = frame.encode();
        bytes[3] = 8; // meta_len
        assert!(matches!(Frame::read_from(&mut Cursor::new(bytes)), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let bytes = sample().encode();
        let short = bytes[..bytes.len() - 3].to_vec();
        match Frame::read_from(&mut Cursor::new(short)) {
            Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_frame_from_cloud() {
        let result = MetricsResult {
            volume: 0.25,
            lowest_z: 2.0,
            ..Default::default()
        };
        let mut cloud = PointCloud::new();
        cloud.push_colored([1.0, 2.0, 3.0], [0.1, 0.2, 0.3]);
        let frame = Frame::new(&result, &cloud);
        assert_eq!(frame.n_cols(), 6);
        assert_eq!(frame.points.row(0).to_vec(), vec![1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        assert_eq!(frame.volume, 0.25);

        let frame = Frame::new(&result, &cloud.xyz_only());
        assert_eq!(frame.n_cols(), 3);
    }
}
