// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{lidar::Error, smoothing::MAX_WINDOW};
use std::time::Duration;

/// Measurement pipeline settings. Lengths are in meters, angles in degrees.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Half side of the square scan region.
    pub space_region_threshold: f32,
    /// Points closer to the sensor than this are ignored.
    pub lidar_height_threshold: f32,
    /// Scans per raw batch.
    pub point_batch: usize,
    /// Batches merged into one collection.
    pub gather_times: usize,
    pub collection_times_per_cycle: usize,
    pub min_valid_collections: u32,
    pub normal_degrees_threshold: f32,
    pub floor_height_threshold: f32,
    /// Floor depth used when `update_lowest_height` is off.
    pub lowest_height: f32,
    pub update_lowest_height: bool,
    pub grid_size: f32,
    pub area_scale: f32,
    pub height_scale: f32,
    pub alert_height: f64,
    pub volume_adjustment: f64,
    pub history_window_size: usize,
    pub report_interval: Duration,
    pub start_lidar_wait_time: Duration,
    pub enable_start_stop: bool,
    /// Largest streamed cloud, 0 for no limit.
    pub points_for_streaming: usize,
    pub lidar_mode: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            space_region_threshold: 1.5,
            lidar_height_threshold: 0.5,
            point_batch: 12,
            gather_times: 1,
            collection_times_per_cycle: 3,
            min_valid_collections: 2,
            normal_degrees_threshold: 10.0,
            floor_height_threshold: 0.1,
            lowest_height: -1.0,
            update_lowest_height: true,
            grid_size: 0.1,
            area_scale: 1.0,
            height_scale: 1.0,
            alert_height: 2.55,
            volume_adjustment: 0.0,
            history_window_size: 5,
            report_interval: Duration::from_secs(300),
            start_lidar_wait_time: Duration::from_secs(20),
            enable_start_stop: false,
            points_for_streaming: 50000,
            lidar_mode: None,
        }
    }
}

fn positive(name: &str, value: f32) -> Result<(), Error> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be positive, got {}", name, value)))
    }
}

fn at_least_one(name: &str, value: usize) -> Result<(), Error> {
    if value >= 1 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be at least 1", name)))
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.history_window_size == 0 || self.history_window_size > MAX_WINDOW {
            return Err(Error::HistoryWindow(self.history_window_size));
        }
        positive("space region threshold", self.space_region_threshold)?;
        positive("floor height threshold", self.floor_height_threshold)?;
        positive("grid size", self.grid_size)?;
        positive("area scale", self.area_scale)?;
        positive("height scale", self.height_scale)?;
        at_least_one("point batch", self.point_batch)?;
        at_least_one("gather times", self.gather_times)?;
        at_least_one("collection times per cycle", self.collection_times_per_cycle)?;
        at_least_one("min valid collections", self.min_valid_collections as usize)?;
        if !(0.0..90.0).contains(&self.normal_degrees_threshold) {
            return Err(Error::Config(format!(
                "normal degrees threshold must be in [0, 90), got {}",
                self.normal_degrees_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_history_window_is_fatal() {
        let config = PipelineConfig {
            history_window_size: 7,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::HistoryWindow(7))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            PipelineConfig {
                grid_size: 0.0,
                ..Default::default()
            },
            PipelineConfig {
                collection_times_per_cycle: 0,
                ..Default::default()
            },
            PipelineConfig {
                normal_degrees_threshold: 95.0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{:?}", config);
        }
    }
}
