// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, ValueEnum};
use edgefirst_lidarvol::{Error, PipelineConfig};
use std::{net::SocketAddr, time::Duration};
use tracing::level_filters::LevelFilter;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Scans relayed over UDP by the sensor driver process
    Bridge,
    /// Simulated floor with a box on it
    Synthetic,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Point source feeding the measurement loop.
    #[arg(long, env, value_enum, default_value = "bridge")]
    pub sensor: SensorKind,

    /// Local address receiving scans from the driver bridge
    #[arg(long, env, default_value = "0.0.0.0:6201")]
    pub bridge_bind: SocketAddr,

    /// Control address of the driver bridge (start/stop/mode commands)
    #[arg(long, env, default_value = "127.0.0.1:6101")]
    pub bridge_control: SocketAddr,

    /// Seconds to wait for a scan before treating the sensor as faulty
    #[arg(long, env, default_value = "5")]
    pub bridge_timeout: u64,

    /// Sensor scan mode code, sent once after every sensor start
    #[arg(long, env)]
    pub lidar_mode: Option<u32>,

    /// Half side length of the square scan region, in meters
    #[arg(long, env, default_value = "1.5")]
    pub space_region_threshold: f32,

    /// Ignore points closer to the sensor than this, in meters
    #[arg(long, env, default_value = "0.5")]
    pub lidar_height_threshold: f32,

    /// Scans per raw batch
    #[arg(long, env, default_value = "12")]
    pub point_batch: usize,

    /// Raw batches merged into each collection
    #[arg(long, env, default_value = "1")]
    pub gather_times: usize,

    /// Collections per measurement cycle
    #[arg(long, env, default_value = "3")]
    pub collection_times_per_cycle: usize,

    /// Collections that must agree before a grid cell counts
    #[arg(long, env, default_value = "2")]
    pub min_valid_collections: u32,

    /// Largest angle between a surface normal and vertical, in degrees
    #[arg(long, env, default_value = "10.0")]
    pub normal_degrees_threshold: f32,

    /// Floor band half width, in meters
    #[arg(long, env, default_value = "0.1")]
    pub floor_height_threshold: f32,

    /// Floor depth below the sensor used when floor estimation is off
    #[arg(long, env, default_value = "-1.0", allow_negative_numbers = true)]
    pub lowest_height: f32,

    /// Estimate the floor from every collection
    #[arg(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub update_lowest_height: bool,

    /// Grid cell edge length, in meters
    #[arg(long, env, default_value = "0.1")]
    pub grid_size: f32,

    /// Calibration factor applied to cell areas
    #[arg(long, env, default_value = "1.0")]
    pub area_scale: f32,

    /// Calibration factor applied to cell heights
    #[arg(long, env, default_value = "1.0")]
    pub height_scale: f32,

    /// Cargo higher than this raises a quadrant alert, in meters
    #[arg(long, env, default_value = "2.55")]
    pub alert_height: f64,

    /// Calibration offset added to the volume, in cubic meters
    #[arg(long, env, default_value = "0.0", allow_negative_numbers = true)]
    pub volume_adjustment: f64,

    /// Cycles blended by the smoother, the current one included (1 to 6)
    #[arg(long, env, default_value = "5")]
    pub history_window_size: usize,

    /// Seconds between the start of two cycles
    #[arg(long, env, default_value = "300")]
    pub report_interval: u64,

    /// Seconds the sensor needs after a start before scans are usable
    #[arg(long, env, default_value = "20")]
    pub start_lidar_wait_time: u64,

    /// Power the sensor down between cycles when the wait is long enough
    #[arg(long, env)]
    pub enable_start_stop: bool,

    /// Stream results to the visualization relay
    #[arg(long, env)]
    pub visualize: bool,

    /// Visualization relay host
    #[arg(long, env, default_value = "127.0.0.1")]
    pub v_server_address: String,

    /// Visualization relay port
    #[arg(long, env, default_value = "5001")]
    pub v_server_port: u16,

    /// Largest point cloud streamed per cycle, 0 for no limit
    #[arg(long, env, default_value = "50000")]
    pub points_for_streaming: usize,

    /// Stop after this many cycles, 0 runs until interrupted
    #[arg(long, env, default_value = "0")]
    pub rounds: usize,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

impl TryFrom<&Args> for PipelineConfig {
    type Error = Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let config = PipelineConfig {
            space_region_threshold: args.space_region_threshold,
            lidar_height_threshold: args.lidar_height_threshold,
            point_batch: args.point_batch,
            gather_times: args.gather_times,
            collection_times_per_cycle: args.collection_times_per_cycle,
            min_valid_collections: args.min_valid_collections,
            normal_degrees_threshold: args.normal_degrees_threshold,
            floor_height_threshold: args.floor_height_threshold,
            lowest_height: args.lowest_height,
            update_lowest_height: args.update_lowest_height,
            grid_size: args.grid_size,
            area_scale: args.area_scale,
            height_scale: args.height_scale,
            alert_height: args.alert_height,
            volume_adjustment: args.volume_adjustment,
            history_window_size: args.history_window_size,
            report_interval: Duration::from_secs(args.report_interval),
            start_lidar_wait_time: Duration::from_secs(args.start_lidar_wait_time),
            enable_start_stop: args.enable_start_stop,
            points_for_streaming: args.points_for_streaming,
            lidar_mode: args.lidar_mode,
        };
        config.validate()?;
        Ok(config)
    }
}
