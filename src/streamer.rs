// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{lidar::Error, protocol::Frame};
use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};
use tracing::{error, info};

/// Best-effort sender of result frames to the visualization relay.
///
/// Each frame goes over a fresh TCP connection which is closed once the
/// frame is written.
#[derive(Clone, Debug)]
pub struct ResultStreamer {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ResultStreamer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(5),
        }
    }

    /// Connect and write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve(&self) -> Result<SocketAddr, Error> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Protocol(format!("cannot resolve {}:{}", self.host, self.port)))
    }

    pub fn try_send(&self, frame: &Frame) -> Result<(), Error> {
        let addr = self.resolve()?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_write_timeout(Some(self.timeout))?;
        frame.write_to(&mut stream)
    }

    /// Send `frame`, logging the outcome. Returns whether it was delivered.
    pub fn send(&self, frame: &Frame) -> bool {
        match self.try_send(frame) {
            Ok(()) => {
                info!(
                    "sent {} points to visualization server {}:{}",
                    frame.n_points(),
                    self.host,
                    self.port
                );
                true
            }
            Err(e) => {
                error!("failed to send results to {}:{}: {}", self.host, self.port, e);
                false
            }
        }
    }
}
