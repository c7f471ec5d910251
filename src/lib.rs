// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst LiDAR Volume Library
//!
//! This library measures the volume, footprint and height of cargo under an
//! overhead LiDAR and relays the results to a visualization process.
//!
//! # Architecture
//!
//! Each measurement cycle turns several independent collections into one
//! result:
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ PointBatchSource │ ──► │ RegionFilter │ ──► │ PlaneExtractor │
//! │ (UDP/synth/test) │     │ + downsample │     │ (normals)      │
//! └──────────────────┘     └──────────────┘     └────────────────┘
//!                                                       │
//!             ┌─────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ FloorEstimator   │ ──► │ CargoIsolator│ ──► │ GridAccumulator│
//! │ (RANSAC)         │     │ (denoise)    │     │ (× collections)│
//! └──────────────────┘     └──────────────┘     └────────────────┘
//!                                                       │
//!             ┌─────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ MetricsAggregator│ ──► │ Temporal     │ ──► │ ResultStreamer │
//! │ (alert quadrant) │     │ Smoother     │     │ (TCP frames)   │
//! └──────────────────┘     └──────────────┘     └────────────────┘
//! ```
//!
//! Coordinates are in the sensor frame with z pointing down, so the floor is
//! the largest z and a height above the floor is `floor - z`.
//!
//! # Modules
//!
//! - [`lidar`]: Point containers and error handling
//! - [`geometry`]: Outlier filters, normals, downsampling, plane fitting
//! - [`region`], [`plane`], [`floor`], [`isolate`]: Per-collection stages
//! - [`grid`], [`metrics`], [`smoothing`]: Per-cycle aggregation
//! - [`protocol`], [`streamer`], [`relay`]: Result frames and their transport
//! - [`source`]: Sensor abstraction
//! - [`workflow`]: The measurement cycle and its cadence
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_lidarvol::{
//!     config::PipelineConfig,
//!     geometry::RansacPlaneFitter,
//!     source::{PointBatchSource, SyntheticSource},
//!     workflow::Pipeline,
//! };
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), RansacPlaneFitter::new())?;
//! let mut source = SyntheticSource::new(2.0, 1.5, None);
//! source.start()?;
//!
//! if let Some(result) = pipeline.run_cycle(&mut source)? {
//!     println!("{}", result.smoothed);
//! }
//! ```

pub mod color;
pub mod config;
pub mod floor;
pub mod geometry;
pub mod grid;
pub mod isolate;
pub mod lidar;
pub mod metrics;
pub mod plane;
pub mod protocol;
pub mod region;
pub mod relay;
pub mod smoothing;
pub mod source;
pub mod streamer;
pub mod workflow;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use geometry::{PlaneFitter, PlaneModel, RansacPlaneFitter};
pub use lidar::{Error, PointCloud, Points};
pub use metrics::{MetricsResult, Quadrant};
pub use protocol::Frame;
pub use source::PointBatchSource;
pub use workflow::{CycleResult, Pipeline, Workflow};
