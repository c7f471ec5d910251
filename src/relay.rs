// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Visualization relay.
//!
//! A listener thread accepts one frame per connection and hands it to the
//! renderer through a bounded queue. Enqueueing never blocks: when the
//! renderer falls behind new frames are dropped, and the renderer itself
//! only ever shows the most recent frame waiting in the queue.

use crate::{
    color::ramp_colors,
    lidar::Error,
    protocol::{Frame, XYZI, XYZRGB},
};
use kanal::{ReceiveErrorTimeout, Receiver, Sender};
use std::{
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::sleep,
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// How often the listener checks the stop flag while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub struct Listener {
    listener: TcpListener,
    tx: Sender<Frame>,
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl Listener {
    pub fn bind<A: ToSocketAddrs>(addr: A, tx: Sender<Frame>, stop: Arc<AtomicBool>) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            tx,
            stop,
            read_timeout: Duration::from_secs(10),
        })
    }

    /// Limit on how long a connected peer may stall mid-frame.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the stop flag is raised.
    ///
    /// A failed connection is logged and dropped; the listener keeps going.
    pub fn run(self) {
        info!("relay listening on {:?}", self.listener.local_addr());

        while !self.stop.load(Ordering::Relaxed) {
            let (stream, peer) = match self.listener.accept() {
                Ok(v) => v,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    sleep(ACCEPT_POLL);
                    continue;
                }
                Err(e) => {
                    error!("accept error: {}", e);
                    sleep(ACCEPT_POLL);
                    continue;
                }
            };

            let frame = match self.receive(stream) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("dropping connection from {}: {}", peer, e);
                    continue;
                }
            };

            info!(
                "received {}x{} points from {}: volume {:.6} m^3, area {:.6} m^2, max height {:.2} m, mean height {:.2} m, floor {:.2} m",
                frame.n_points(),
                frame.n_cols(),
                peer,
                frame.volume,
                frame.area,
                frame.max_height,
                frame.mean_height,
                frame.lowest_z
            );

            match self.tx.try_send(frame) {
                Ok(true) => {}
                Ok(false) => debug!("render queue full, frame dropped"),
                Err(_) => {
                    warn!("renderer gone, listener exiting");
                    return;
                }
            }
        }

        info!("relay listener stopped");
    }

    fn receive(&self, mut stream: TcpStream) -> Result<Frame, Error> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        Frame::read_from(&mut stream)
    }
}

/// Outcome of polling the render queue.
#[derive(Debug)]
pub enum Latest<T> {
    Frame(T),
    Idle,
    Closed,
}

/// Newest message on `rx`, discarding anything older. Waits up to `timeout`
/// when the queue is empty.
pub fn drain_latest<T>(rx: &Receiver<T>, timeout: Duration) -> Latest<T> {
    let mut msg = match rx.try_recv() {
        Err(_) => return Latest::Closed,
        Ok(Some(v)) => v,
        Ok(None) => match rx.recv_timeout(timeout) {
            Ok(v) => v,
            Err(ReceiveErrorTimeout::Timeout) => return Latest::Idle,
            Err(_) => return Latest::Closed,
        },
    };
    while let Ok(Some(v)) = rx.try_recv() {
        msg = v;
    }
    Latest::Frame(msg)
}

/// Per-point colors for a received frame.
///
/// Six columns carry RGB directly; a fourth column is a grayscale intensity
/// mapped through the color ramp. Without either, or when every intensity
/// is zero, points are colored by depth.
pub fn frame_colors(frame: &Frame) -> Vec<[f32; 3]> {
    let points = &frame.points;
    match points.ncols() as u32 {
        XYZRGB => points
            .rows()
            .into_iter()
            .map(|r| [r[3], r[4], r[5]])
            .collect(),
        XYZI if points.column(3).iter().any(|&v| v != 0.0) => {
            ramp_colors(&points.column(3).to_vec())
        }
        _ if points.ncols() >= 3 => ramp_colors(&points.column(2).to_vec()),
        _ => vec![[0.0; 3]; points.nrows()],
    }
}

/// Display backend for relayed frames.
pub trait Renderer {
    fn render(&mut self, frame: &Frame, colors: &[[f32; 3]]) -> Result<(), Error>;
}

/// Renderer that only reports each frame in the log.
#[derive(Debug, Default)]
pub struct LogRenderer {
    frames: u64,
}

impl LogRenderer {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &Frame, _colors: &[[f32; 3]]) -> Result<(), Error> {
        self.frames += 1;
        info!(
            "frame {}: {} points, volume {:.6} m^3, area {:.6} m^2, max height {:.2} m, mean height {:.2} m, floor {:.2} m",
            self.frames,
            frame.n_points(),
            frame.volume,
            frame.area,
            frame.max_height,
            frame.mean_height,
            frame.lowest_z
        );
        Ok(())
    }
}

#[cfg(feature = "rerun")]
pub use self::viewer::RerunRenderer;

#[cfg(feature = "rerun")]
mod viewer {
    use super::{Error, Frame, Renderer};
    use rerun::RecordingStream;

    /// Forwards frames to a rerun viewer or recording.
    pub struct RerunRenderer {
        rr: RecordingStream,
    }

    impl RerunRenderer {
        pub fn new(rr: RecordingStream) -> Self {
            Self { rr }
        }
    }

    fn render_err(err: rerun::RecordingStreamError) -> Error {
        Error::Render(err.to_string())
    }

    impl Renderer for RerunRenderer {
        fn render(&mut self, frame: &Frame, colors: &[[f32; 3]]) -> Result<(), Error> {
            let positions = frame
                .points
                .rows()
                .into_iter()
                .map(|r| (r[0], r[1], r[2]))
                .collect::<Vec<_>>();
            let colors = colors.iter().map(|c| {
                let [r, g, b] = c.map(|v| (v.clamp(0.0, 1.0) * 255.0) as u8);
                rerun::Color::from_rgb(r, g, b)
            });

            self.rr
                .log("relay/points", &rerun::Points3D::new(positions).with_colors(colors))
                .map_err(render_err)?;
            for (path, value) in [
                ("relay/volume", frame.volume),
                ("relay/area", frame.area),
                ("relay/max_height", frame.max_height),
                ("relay/mean_height", frame.mean_height),
                ("relay/lowest_z", frame.lowest_z),
            ] {
                self.rr
                    .log(path, &rerun::Scalar::new(value as f64))
                    .map_err(render_err)?;
            }
            Ok(())
        }
    }
}

/// Render the newest queued frame until the stop flag is raised or every
/// sender is gone.
pub fn render_loop(rx: Receiver<Frame>, renderer: &mut dyn Renderer, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        let frame = match drain_latest(&rx, Duration::from_millis(200)) {
            Latest::Frame(frame) => frame,
            Latest::Idle => continue,
            Latest::Closed => return,
        };

        let colors = frame_colors(&frame);
        if let Err(e) = renderer.render(&frame, &colors) {
            error!("render error: {}", e);
        }
    }
}
