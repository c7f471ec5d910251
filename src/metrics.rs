// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::grid::GridSummary;
use std::fmt;

/// Sensor-frame quadrant of the highest cargo cell when it exceeds the
/// alert height. Zero coordinates count as positive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Quadrant {
    #[default]
    None,
    /// `x ≥ 0, y ≥ 0`
    First,
    /// `x < 0, y ≥ 0`
    Second,
    /// `x < 0, y < 0`
    Third,
    /// `x ≥ 0, y < 0`
    Fourth,
}

impl Quadrant {
    pub fn from_xy(x: f64, y: f64) -> Self {
        match (x >= 0.0, y >= 0.0) {
            (true, true) => Quadrant::First,
            (false, true) => Quadrant::Second,
            (false, false) => Quadrant::Third,
            (true, false) => Quadrant::Fourth,
        }
    }

    /// Numeric code, 0 when there is no alert.
    pub fn code(self) -> u8 {
        match self {
            Quadrant::None => 0,
            Quadrant::First => 1,
            Quadrant::Second => 2,
            Quadrant::Third => 3,
            Quadrant::Fourth => 4,
        }
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Quadrant::None => write!(f, "-"),
            q => write!(f, "{}", q.code()),
        }
    }
}

/// One cycle's measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricsResult {
    /// Cubic meters.
    pub volume: f64,
    /// Square meters.
    pub area: f64,
    pub max_height: f64,
    pub mean_height: f64,
    /// Floor depth below the sensor used for the grid.
    pub lowest_z: f64,
    pub quadrant: Quadrant,
}

impl fmt::Display for MetricsResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "volume = {:.6} m^3, area = {:.6} m^2, max height = {:.6} m, mean height = {:.6} m, floor = {:.6} m, quadrant = {}",
            self.volume, self.area, self.max_height, self.mean_height, self.lowest_z, self.quadrant
        )
    }
}

/// Turns a grid summary into a [`MetricsResult`].
#[derive(Clone, Copy, Debug)]
pub struct MetricsAggregator {
    pub alert_height: f64,
    /// Calibration offset added to the volume.
    pub volume_adjustment: f64,
}

impl MetricsAggregator {
    pub fn new(alert_height: f64, volume_adjustment: f64) -> Self {
        Self {
            alert_height,
            volume_adjustment,
        }
    }

    pub fn quadrant(&self, max_height: f64, (x, y): (f64, f64)) -> Quadrant {
        if max_height > self.alert_height {
            Quadrant::from_xy(x, y)
        } else {
            Quadrant::None
        }
    }

    pub fn aggregate(&self, summary: &GridSummary, lowest_z: f64) -> MetricsResult {
        MetricsResult {
            volume: (summary.volume + self.volume_adjustment).max(0.0),
            area: summary.area,
            max_height: summary.max_height,
            mean_height: summary.mean_height,
            lowest_z,
            quadrant: self.quadrant(summary.max_height, summary.max_cell_xy),
        }
    }
}
