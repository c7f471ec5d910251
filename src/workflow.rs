// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Measurement cycle and the loop that drives it.
//!
//! A cycle gathers `collection_times_per_cycle` collections. Each one is
//! reduced to horizontal surfaces, gets a floor estimate, and has its cargo
//! separated from the floor. The cargo of every collection then feeds one
//! height grid, whose summary is smoothed against previous cycles and
//! streamed to the relay.

use crate::{
    color::height_colors,
    config::PipelineConfig,
    floor::FloorEstimator,
    geometry::{PlaneFitter, voxel_downsample},
    grid::{self, GridParams},
    isolate::CargoIsolator,
    lidar::{Error, PointCloud},
    metrics::{MetricsAggregator, MetricsResult},
    plane::{MIN_PLANE_POINTS, PlaneExtractor},
    protocol::Frame,
    region::{GATHER_VOXEL_SIZE, Gathered, RegionFilter},
    smoothing::TemporalSmoother,
    source::PointBatchSource,
    streamer::ResultStreamer,
};
use rand::seq::index::sample;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{error, info, info_span, instrument, warn};

/// Output of one collection pass.
#[derive(Clone, Debug)]
pub struct Collection {
    /// Floor depth recorded for this pass: the raw estimate, or the
    /// configured depth when estimation is off.
    pub floor: f64,
    /// Cargo surface points, empty when no cargo was seen.
    pub cargo: PointCloud,
}

/// Output of one cycle.
#[derive(Clone, Debug)]
pub struct CycleResult {
    pub raw: MetricsResult,
    pub smoothed: MetricsResult,
    /// Height-colored cargo points for the relay.
    pub cloud: PointCloud,
}

pub struct Pipeline<F: PlaneFitter> {
    config: PipelineConfig,
    region: RegionFilter,
    planes: PlaneExtractor,
    floor: FloorEstimator,
    isolator: CargoIsolator,
    aggregator: MetricsAggregator,
    smoother: TemporalSmoother,
    fitter: F,
}

impl<F: PlaneFitter> Pipeline<F> {
    pub fn new(config: PipelineConfig, fitter: F) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            region: RegionFilter::new(config.space_region_threshold, config.lidar_height_threshold),
            planes: PlaneExtractor::new(config.normal_degrees_threshold),
            floor: FloorEstimator::new(config.floor_height_threshold),
            isolator: CargoIsolator::new(config.floor_height_threshold),
            aggregator: MetricsAggregator::new(config.alert_height, config.volume_adjustment),
            smoother: TemporalSmoother::new(config.history_window_size)?,
            config,
            fitter,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn smoother(&self) -> &TemporalSmoother {
        &self.smoother
    }

    /// Merge `gather_times` filtered batches into one collection.
    pub fn gather(&self, source: &mut dyn PointBatchSource) -> Result<PointCloud, Error> {
        let mut gathered = Gathered::new();
        for i in 0..self.config.gather_times {
            info!("gathering point cloud {}/{}", i + 1, self.config.gather_times);
            let batch = source.get_batch(self.config.point_batch)?;
            gathered.add(&self.region.apply(&batch));
        }
        Ok(gathered.into_cloud())
    }

    /// Reduce one gathered collection to its floor depth and cargo points.
    ///
    /// Returns `None` when the collection has too few plane points.
    #[instrument(skip_all, fields(n = cloud.len()))]
    pub fn process_collection(&mut self, cloud: &PointCloud) -> Option<Collection> {
        let plane = self.planes.extract(cloud);
        if plane.len() < MIN_PLANE_POINTS {
            warn!("not enough points to form a plane ({}), skipping collection", plane.len());
            return None;
        }

        let (recorded, used) = if self.config.update_lowest_height {
            let raw = self.floor.estimate(&plane, &mut self.fitter)?.height;
            (raw, self.smoother.smoothed_floor(raw))
        } else {
            let configured = self.config.lowest_height as f64;
            (configured, configured)
        };
        info!("using floor height {:.6} m", used);

        Some(Collection {
            floor: recorded,
            cargo: self.isolator.isolate(&plane, used as f32),
        })
    }

    /// Grid, aggregate and smooth the collections of one cycle.
    ///
    /// Returns `None` when no collection found cargo. The raw result is
    /// recorded in the smoothing history.
    pub fn finish_cycle(&mut self, collections: &[Collection]) -> Option<CycleResult> {
        let cargo: Vec<PointCloud> = collections
            .iter()
            .filter(|c| !c.cargo.is_empty())
            .map(|c| c.cargo.clone())
            .collect();
        if cargo.is_empty() {
            return None;
        }

        let lowest_z = collections.iter().map(|c| c.floor).sum::<f64>() / collections.len() as f64;
        let params = GridParams {
            grid_size: self.config.grid_size,
            area_scale: self.config.area_scale,
            height_scale: self.config.height_scale,
            min_valid_collections: self.config.min_valid_collections,
        };
        let summary = grid::accumulate(params, &cargo, lowest_z)?;

        let raw = self.aggregator.aggregate(&summary, lowest_z);
        info!("raw results from grid: {}", raw);
        let smoothed = self.smoother.smooth(&raw);
        self.smoother.record(raw);

        Some(CycleResult {
            raw,
            smoothed,
            cloud: self.representative_cloud(&cargo, lowest_z),
        })
    }

    /// Gather and process every collection of one cycle.
    ///
    /// Sensor errors abort the cycle; missing data yields `Ok(None)`.
    pub fn run_cycle(&mut self, source: &mut dyn PointBatchSource) -> Result<Option<CycleResult>, Error> {
        let total = self.config.collection_times_per_cycle;
        let mut collections = Vec::with_capacity(total);

        for i in 0..total {
            info!("collection {}/{}", i + 1, total);
            let cloud = self.gather(source)?;
            if cloud.is_empty() {
                warn!("no points gathered, the sensor may not be working properly");
                continue;
            }
            if let Some(collection) = self.process_collection(&cloud) {
                collections.push(collection);
            }
        }

        Ok(self.finish_cycle(&collections))
    }

    /// Merged cargo, downsampled and colored by height. Never empty: without
    /// cargo a single point at the origin is returned.
    fn representative_cloud(&self, cargo: &[PointCloud], floor: f64) -> PointCloud {
        let mut merged = PointCloud::new();
        for cloud in cargo {
            merged.append(&cloud.xyz_only());
        }
        let mut cloud = voxel_downsample(&merged, GATHER_VOXEL_SIZE);

        if cloud.is_empty() {
            cloud.push_colored([0.0; 3], [0.0; 3]);
            return cloud;
        }

        // colors are normalized over the whole cloud, before any subsampling
        cloud.colors = height_colors(
            &cloud,
            floor as f32,
            self.config.floor_height_threshold,
            self.config.alert_height as f32,
            self.config.height_scale,
        );

        let limit = self.config.points_for_streaming;
        if limit > 0 && cloud.len() > limit {
            let mut picked = sample(&mut rand::thread_rng(), cloud.len(), limit).into_vec();
            picked.sort_unstable();
            cloud = cloud.select(&picked);
        }
        cloud
    }
}

/// Sleep up to `duration`, waking early when `stop` is raised. Returns
/// `false` if stopped.
pub fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(100);
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        sleep(SLICE.min(deadline - now));
    }
}

/// Drives the pipeline on the report cadence until stopped.
pub struct Workflow<S: PointBatchSource, F: PlaneFitter> {
    pipeline: Pipeline<F>,
    source: S,
    streamer: Option<ResultStreamer>,
    stop: Arc<AtomicBool>,
    max_rounds: Option<usize>,
    retry_delay: Duration,
}

impl<S: PointBatchSource, F: PlaneFitter> Workflow<S, F> {
    pub fn new(pipeline: Pipeline<F>, source: S, stop: Arc<AtomicBool>) -> Self {
        Self {
            pipeline,
            source,
            streamer: None,
            stop,
            max_rounds: None,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Stream every result to the relay.
    pub fn with_streamer(mut self, streamer: ResultStreamer) -> Self {
        self.streamer = Some(streamer);
        self
    }

    /// Stop after `rounds` cycles, whether or not they produced a result.
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    /// Pause after a cycle without a result.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn pipeline(&self) -> &Pipeline<F> {
        &self.pipeline
    }

    fn start_sensor(&mut self) -> bool {
        if let Err(e) = self.source.start() {
            error!("failed to start sensor: {}", e);
            return false;
        }
        if let Some(mode) = self.pipeline.config().lidar_mode {
            if let Err(e) = self.source.set_mode(mode) {
                warn!("failed to set sensor mode {}: {}", mode, e);
            }
        }
        info!("sensor started, waiting {:?} to settle", self.pipeline.config().start_lidar_wait_time);
        sleep_unless_stopped(&self.stop, self.pipeline.config().start_lidar_wait_time)
    }

    fn stop_sensor(&mut self) {
        match self.source.stop() {
            Ok(()) => info!("sensor stopped"),
            Err(e) => error!("failed to stop sensor: {}", e),
        }
    }

    /// Run cycles until the stop flag is raised or the round limit is hit.
    /// The sensor is stopped before returning. Returns the number of cycles
    /// that produced a result.
    pub fn run(&mut self) -> usize {
        let mut results = 0;
        let mut restart = !self.start_sensor();
        let mut round = 0usize;

        while !self.stop.load(Ordering::Relaxed) {
            if self.max_rounds.is_some_and(|max| round >= max) {
                break;
            }
            if restart {
                warn!("restarting sensor");
                self.stop_sensor();
                restart = !self.start_sensor();
                if restart {
                    sleep_unless_stopped(&self.stop, self.retry_delay);
                    continue;
                }
            }

            round += 1;
            let span = info_span!("cycle", round);
            let _guard = span.enter();
            info!("round {}", round);

            let begin = Instant::now();
            let result = match self.pipeline.run_cycle(&mut self.source) {
                Ok(Some(result)) => result,
                Ok(None) => {
                    warn!("no result this cycle, retrying");
                    sleep_unless_stopped(&self.stop, self.retry_delay);
                    continue;
                }
                Err(e) => {
                    error!("cycle failed: {}", e);
                    restart = true;
                    sleep_unless_stopped(&self.stop, self.retry_delay);
                    continue;
                }
            };
            info!("smoothed results: {}", result.smoothed);

            if let Some(streamer) = &self.streamer {
                streamer.send(&Frame::new(&result.smoothed, &result.cloud));
            }
            results += 1;

            if self.max_rounds.is_some_and(|max| round >= max) {
                break;
            }
            restart = !self.wait_for_next_cycle(begin.elapsed());
        }

        self.stop_sensor();
        results
    }

    /// Sleep out the rest of the report interval. Returns `false` when the
    /// sensor was powered down and failed to come back.
    fn wait_for_next_cycle(&mut self, elapsed: Duration) -> bool {
        match plan_wait(self.pipeline.config(), elapsed) {
            WaitPlan::Sleep(wait) => {
                info!("waiting {:.1} s for next cycle", wait.as_secs_f32());
                sleep_unless_stopped(&self.stop, wait);
                true
            }
            WaitPlan::PowerCycle { off } => {
                info!("stopping sensor for {:.1} s until next cycle", off.as_secs_f32());
                self.stop_sensor();
                if !sleep_unless_stopped(&self.stop, off) {
                    return true;
                }
                // start_sensor waits out the settle time
                let running = self.start_sensor();
                if !running {
                    error!("sensor did not restart");
                }
                running
            }
        }
    }
}

/// How to spend the time between two cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPlan {
    Sleep(Duration),
    /// Power the sensor down for `off`, then restart it and let it settle.
    PowerCycle { off: Duration },
}

/// Wait for the rest of the report interval after a cycle that took
/// `elapsed`. With start/stop enabled, waits longer than three settle
/// periods power the sensor down.
pub fn plan_wait(config: &PipelineConfig, elapsed: Duration) -> WaitPlan {
    let wait = config.report_interval.saturating_sub(elapsed);
    let settle = config.start_lidar_wait_time;
    if config.enable_start_stop && wait > settle * 3 {
        WaitPlan::PowerCycle { off: wait - settle }
    } else {
        WaitPlan::Sleep(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geometry::PlaneModel, lidar::Points, source::ReplaySource};

    /// Horizontal plane at a fixed depth.
    struct FlatFloor(f64);

    impl PlaneFitter for FlatFloor {
        fn fit_plane(&mut self, cloud: &PointCloud, _: f64, _: usize, _: usize) -> Option<PlaneModel> {
            Some(PlaneModel {
                a: 0.0,
                b: 0.0,
                c: 1.0,
                d: -self.0,
                inliers: vec![true; cloud.len()],
            })
        }
    }

    /// Floor at 2m with a 0.8m box top at `2 - height` in the middle.
    fn scan(height: f32) -> Points {
        let mut points = Points::default();
        for i in 0..40 {
            for j in 0..40 {
                let x = i as f32 * 0.05 - 1.0;
                let y = j as f32 * 0.05 - 1.0;
                let z = if x.abs() < 0.4 && y.abs() < 0.4 { 2.0 - height } else { 2.0 };
                points.push(x, y, z, (i + j) as f32);
            }
        }
        points
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            point_batch: 1,
            report_interval: Duration::ZERO,
            start_lidar_wait_time: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_cycle_measures_box() {
        let mut pipeline = Pipeline::new(config(), FlatFloor(2.0)).unwrap();
        let mut source = ReplaySource::new(vec![scan(0.5)]);
        source.start().unwrap();

        let result = pipeline.run_cycle(&mut source).unwrap().unwrap();
        assert!((result.raw.lowest_z - 2.0).abs() < 1e-6);
        assert!((result.raw.max_height - 0.5).abs() < 1e-3);
        assert!(result.raw.area > 0.4 && result.raw.area < 0.9, "area {}", result.raw.area);
        // first cycle: nothing to blend with
        assert!((result.raw.volume - result.smoothed.volume).abs() < 1e-6);
        assert!(result.raw.volume > 0.2);
        assert!(result.cloud.has_colors());
        assert_eq!(pipeline.smoother().len(), 1);
    }

    #[test]
    fn test_empty_floor_yields_no_result() {
        let mut pipeline = Pipeline::new(config(), FlatFloor(2.0)).unwrap();
        let mut source = ReplaySource::new(vec![scan(0.0)]);
        source.start().unwrap();
        assert!(pipeline.run_cycle(&mut source).unwrap().is_none());
        assert!(pipeline.smoother().is_empty());
    }

    #[test]
    fn test_configured_floor() {
        let config = PipelineConfig {
            update_lowest_height: false,
            lowest_height: 2.0,
            ..config()
        };
        // a fitter that would put the floor somewhere else entirely
        let mut pipeline = Pipeline::new(config, FlatFloor(9.0)).unwrap();
        let mut source = ReplaySource::new(vec![scan(0.5)]);
        source.start().unwrap();
        let result = pipeline.run_cycle(&mut source).unwrap().unwrap();
        assert_eq!(result.raw.lowest_z, 2.0);
    }

    #[test]
    fn test_sensor_fault_propagates() {
        let mut pipeline = Pipeline::new(config(), FlatFloor(2.0)).unwrap();
        let mut source = ReplaySource::new(vec![scan(0.5)]);
        assert!(matches!(pipeline.run_cycle(&mut source), Err(Error::Sensor(_))));
    }

    #[test]
    fn test_streaming_limit() {
        let config = PipelineConfig {
            points_for_streaming: 10,
            ..config()
        };
        let mut pipeline = Pipeline::new(config, FlatFloor(2.0)).unwrap();
        let mut source = ReplaySource::new(vec![scan(0.5)]);
        source.start().unwrap();
        let result = pipeline.run_cycle(&mut source).unwrap().unwrap();
        assert_eq!(result.cloud.len(), 10);
    }

    #[test]
    fn test_streaming_colors_span_whole_cloud() {
        let config = PipelineConfig {
            points_for_streaming: 1,
            ..config()
        };
        let pipeline = Pipeline::new(config, FlatFloor(2.0)).unwrap();
        // cargo tops 0.5m and 0.2m above a 2m floor
        let cargo = PointCloud::from_xyz(&[[0.0, 0.0, 1.5], [0.5, 0.5, 1.8]]);
        let cloud = pipeline.representative_cloud(&[cargo], 2.0);

        assert_eq!(cloud.len(), 1);
        // the lone survivor keeps its place on the ramp of both heights
        let expected = if cloud.z[0] < 1.6 { [0.3, 0.7, 1.0] } else { [0.0, 0.0, 0.5] };
        assert_eq!(cloud.colors[0], expected);
    }

    #[test]
    fn test_workflow_rounds_and_shutdown() {
        let pipeline = Pipeline::new(config(), FlatFloor(2.0)).unwrap();
        let source = ReplaySource::new(vec![scan(0.5)]);
        let mut workflow = Workflow::new(pipeline, source, Arc::new(AtomicBool::new(false)))
            .with_max_rounds(3)
            .with_retry_delay(Duration::ZERO);

        assert_eq!(workflow.run(), 3);
        assert_eq!(workflow.pipeline().smoother().len(), 3);
        assert!(!workflow.source().is_running());
        assert_eq!(workflow.source().stops, 1);
    }

    #[test]
    fn test_wait_plan() {
        let config = PipelineConfig {
            report_interval: Duration::from_secs(300),
            start_lidar_wait_time: Duration::from_secs(20),
            ..Default::default()
        };
        assert_eq!(
            plan_wait(&config, Duration::from_secs(60)),
            WaitPlan::Sleep(Duration::from_secs(240))
        );
        assert_eq!(plan_wait(&config, Duration::from_secs(400)), WaitPlan::Sleep(Duration::ZERO));

        let config = PipelineConfig {
            enable_start_stop: true,
            ..config
        };
        assert_eq!(
            plan_wait(&config, Duration::from_secs(60)),
            WaitPlan::PowerCycle {
                off: Duration::from_secs(220)
            }
        );
        // 60s left is not more than three settle periods
        assert_eq!(
            plan_wait(&config, Duration::from_secs(240)),
            WaitPlan::Sleep(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_stop_flag_interrupts_sleep() {
        let stop = AtomicBool::new(true);
        let begin = Instant::now();
        assert!(!sleep_unless_stopped(&stop, Duration::from_secs(10)));
        assert!(begin.elapsed() < Duration::from_secs(1));
    }
}
