// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point batch sources.
//!
//! The measurement loop consumes the sensor only through
//! [`PointBatchSource`], so the same pipeline runs against:
//!
//! - **Live sensor**: [`UdpBridgeSource`] receives scans from an external
//!   driver process that owns the LiDAR wire protocol
//! - **Bench-top**: [`SyntheticSource`] renders a floor with a box on it
//! - **Testing**: [`ReplaySource`] loops over pre-recorded scans

use crate::lidar::{Error, Points};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{
    net::{SocketAddr, UdpSocket},
    time::Duration,
};
use tracing::{debug, warn};

/// Sensor handle used by the measurement loop.
///
/// Calls block. A failed read surfaces as an error; the loop treats it as a
/// missed collection and restarts the sensor before the next cycle.
pub trait PointBatchSource {
    fn start(&mut self) -> Result<(), Error>;

    fn stop(&mut self) -> Result<(), Error>;

    /// Concatenate the next `scans` scans into one batch.
    fn get_batch(&mut self, scans: usize) -> Result<Points, Error>;

    /// Switch the sensor's scan mode.
    fn set_mode(&mut self, mode: u32) -> Result<(), Error>;
}

/// Bytes per point record on the bridge: `x, y, z, intensity` as
/// big-endian `f32`.
pub const RECORD_LEN: usize = 16;

/// Largest datagram the bridge may send.
const MAX_DATAGRAM: usize = 65536;

/// Receives scans from a driver bridge over UDP.
///
/// Each datagram is one scan of packed point records. Control commands
/// (`start`, `stop`, `mode <code>`) are sent as ASCII datagrams to the
/// bridge's control address.
pub struct UdpBridgeSource {
    socket: UdpSocket,
    control: SocketAddr,
    buf: Vec<u8>,
}

impl UdpBridgeSource {
    pub fn bind(bind: SocketAddr, control: SocketAddr, timeout: Duration) -> Result<Self, Error> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(timeout))?;
        Ok(Self {
            socket,
            control,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    fn command(&self, cmd: &str) -> Result<(), Error> {
        self.socket
            .send_to(cmd.as_bytes(), self.control)
            .map_err(|e| Error::Sensor(format!("{} command failed: {}", cmd, e)))?;
        debug!("sent {:?} to bridge {}", cmd, self.control);
        Ok(())
    }
}

/// Decode packed records, appending to `points`. Returns the number of
/// trailing bytes that did not form a whole record.
pub fn decode_records(data: &[u8], points: &mut Points) -> usize {
    let records = data.chunks_exact(RECORD_LEN);
    let remainder = records.remainder().len();
    for r in records {
        let f = |i: usize| f32::from_be_bytes([r[i], r[i + 1], r[i + 2], r[i + 3]]);
        points.push(f(0), f(4), f(8), f(12));
    }
    remainder
}

impl PointBatchSource for UdpBridgeSource {
    fn start(&mut self) -> Result<(), Error> {
        self.command("start")
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.command("stop")
    }

    fn get_batch(&mut self, scans: usize) -> Result<Points, Error> {
        let mut points = Points::default();
        for _ in 0..scans {
            let (len, from) = self
                .socket
                .recv_from(&mut self.buf)
                .map_err(|e| Error::Sensor(format!("scan receive failed: {}", e)))?;
            let extra = decode_records(&self.buf[..len], &mut points);
            if extra != 0 {
                warn!("scan from {} has {} trailing bytes", from, extra);
            }
        }
        Ok(points)
    }

    fn set_mode(&mut self, mode: u32) -> Result<(), Error> {
        self.command(&format!("mode {}", mode))
    }
}

/// Loops over a fixed list of scans.
#[derive(Clone, Debug, Default)]
pub struct ReplaySource {
    scans: Vec<Points>,
    index: usize,
    running: bool,
    pub starts: usize,
    pub stops: usize,
    pub mode: Option<u32>,
}

impl ReplaySource {
    pub fn new(scans: Vec<Points>) -> Self {
        Self {
            scans,
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl PointBatchSource for ReplaySource {
    fn start(&mut self) -> Result<(), Error> {
        self.running = true;
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.running = false;
        self.stops += 1;
        Ok(())
    }

    fn get_batch(&mut self, scans: usize) -> Result<Points, Error> {
        if !self.running {
            return Err(Error::Sensor("sensor not started".to_string()));
        }
        let mut points = Points::default();
        if self.scans.is_empty() {
            return Ok(points);
        }
        for _ in 0..scans {
            points.extend(&self.scans[self.index]);
            self.index = (self.index + 1) % self.scans.len();
        }
        Ok(points)
    }

    fn set_mode(&mut self, mode: u32) -> Result<(), Error> {
        self.mode = Some(mode);
        Ok(())
    }
}

/// Box resting on the floor, in sensor coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneBox {
    /// XY centre.
    pub center: (f32, f32),
    /// XY size.
    pub size: (f32, f32),
    pub height: f32,
}

/// Renders a noisy floor with an optional box on it.
pub struct SyntheticSource {
    rng: StdRng,
    floor_depth: f32,
    half_extent: f32,
    spacing: f32,
    noise: f32,
    cargo: Option<SceneBox>,
    running: bool,
}

impl SyntheticSource {
    pub fn new(floor_depth: f32, half_extent: f32, cargo: Option<SceneBox>) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            floor_depth,
            half_extent,
            spacing: 0.03,
            noise: 0.005,
            cargo,
            running: false,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Sample grid spacing and depth noise amplitude in meters.
    pub fn with_sampling(mut self, spacing: f32, noise: f32) -> Self {
        self.spacing = spacing;
        self.noise = noise;
        self
    }

    fn scan(&mut self) -> Points {
        let steps = (2.0 * self.half_extent / self.spacing).round() as usize;
        let mut points = Points::with_capacity(steps * steps);
        for i in 0..steps {
            for j in 0..steps {
                let x = -self.half_extent + (i as f32 + 0.5) * self.spacing;
                let y = -self.half_extent + (j as f32 + 0.5) * self.spacing;
                let on_box = self.cargo.filter(|b| {
                    (x - b.center.0).abs() <= b.size.0 / 2.0 && (y - b.center.1).abs() <= b.size.1 / 2.0
                });
                let depth = match on_box {
                    Some(b) => self.floor_depth - b.height,
                    None => self.floor_depth,
                };
                let jitter = if self.noise > 0.0 {
                    self.rng.gen_range(-self.noise..self.noise)
                } else {
                    0.0
                };
                let intensity = self.rng.gen_range(0.0..255.0f32);
                points.push(x, y, depth + jitter, intensity);
            }
        }
        points
    }
}

impl PointBatchSource for SyntheticSource {
    fn start(&mut self) -> Result<(), Error> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.running = false;
        Ok(())
    }

    fn get_batch(&mut self, scans: usize) -> Result<Points, Error> {
        if !self.running {
            return Err(Error::Sensor("sensor not started".to_string()));
        }
        let mut points = Points::default();
        for _ in 0..scans {
            points.extend(&self.scan());
        }
        Ok(points)
    }

    fn set_mode(&mut self, _mode: u32) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(z: f32) -> Points {
        let mut p = Points::default();
        p.push(0.0, 0.0, z, 1.0);
        p
    }

    #[test]
    fn test_replay_loops() {
        let mut source = ReplaySource::new(vec![scan(1.0), scan(2.0)]);
        assert!(source.get_batch(1).is_err());

        source.start().unwrap();
        let batch = source.get_batch(3).unwrap();
        assert_eq!(batch.z, vec![1.0, 2.0, 1.0]);
        assert_eq!(source.get_batch(1).unwrap().z, vec![2.0]);

        source.set_mode(3).unwrap();
        source.stop().unwrap();
        assert_eq!((source.starts, source.stops, source.mode), (1, 1, Some(3)));
        assert!(!source.is_running());
    }

    #[test]
    fn test_decode_records() {
        let mut data = Vec::new();
        for v in [0.5f32, -0.25, 1.75, 42.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        data.extend_from_slice(&[1, 2, 3]);

        let mut points = Points::default();
        assert_eq!(decode_records(&data, &mut points), 3);
        assert_eq!(points.len(), 1);
        assert_eq!((points.x[0], points.y[0], points.z[0], points.intensity[0]), (0.5, -0.25, 1.75, 42.0));
    }

    #[test]
    fn test_udp_bridge() {
        let control = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut source = UdpBridgeSource::bind(
            "127.0.0.1:0".parse().unwrap(),
            control.local_addr().unwrap(),
            Duration::from_secs(2),
        )
        .unwrap();

        source.start().unwrap();
        let mut buf = [0u8; 64];
        let (len, from) = control.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"start");

        let mut scan = Vec::new();
        for v in [0.1f32, 0.2, 1.5, 7.0, 0.3, 0.4, 1.6, 8.0] {
            scan.extend_from_slice(&v.to_be_bytes());
        }
        control.send_to(&scan, from).unwrap();
        control.send_to(&scan, from).unwrap();

        let batch = source.get_batch(2).unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.z, vec![1.5, 1.6, 1.5, 1.6]);
    }

    #[test]
    fn test_synthetic_box() {
        let cargo = SceneBox {
            center: (0.0, 0.0),
            size: (0.4, 0.4),
            height: 0.5,
        };
        let mut source = SyntheticSource::new(2.0, 1.0, Some(cargo))
            .with_seed(3)
            .with_sampling(0.05, 0.0);
        source.start().unwrap();
        let batch = source.get_batch(2).unwrap();
        assert_eq!(batch.len(), 2 * 40 * 40);
        assert!(batch.z.iter().any(|&z| (z - 1.5).abs() < 1e-6));
        assert!(batch.z.iter().all(|&z| (z - 1.5).abs() < 1e-6 || (z - 2.0).abs() < 1e-6));
    }
}
