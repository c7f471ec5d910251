// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, SensorKind};
use clap::Parser;
use edgefirst_lidarvol::{
    PipelineConfig, PlaneFitter, PointBatchSource, RansacPlaneFitter,
    source::{SceneBox, SyntheticSource, UdpBridgeSource},
    streamer::ResultStreamer,
    workflow::{Pipeline, Workflow},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.rust_log.into())
                .from_env_lossy(),
        )
        .init();

    // Window misconfiguration must stop us here, before the sensor is touched.
    let config = PipelineConfig::try_from(&args)?;
    let pipeline = Pipeline::new(config, RansacPlaneFitter::new())?;

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        s.store(true, Ordering::Relaxed);
    })?;

    match args.sensor {
        SensorKind::Bridge => {
            let source = UdpBridgeSource::bind(
                args.bridge_bind,
                args.bridge_control,
                Duration::from_secs(args.bridge_timeout),
            )?;
            info!(
                "receiving scans on {} from bridge {}",
                source.local_addr()?,
                args.bridge_control
            );
            run(pipeline, source, &args, stop);
        }
        SensorKind::Synthetic => {
            let cargo = SceneBox {
                center: (0.3, -0.2),
                size: (0.6, 0.4),
                height: 0.8,
            };
            let floor = args.lidar_height_threshold + 2.0;
            let source = SyntheticSource::new(floor, args.space_region_threshold, Some(cargo));
            run(pipeline, source, &args, stop);
        }
    }

    Ok(())
}

fn run<S, F>(pipeline: Pipeline<F>, source: S, args: &Args, stop: Arc<AtomicBool>)
where
    S: PointBatchSource,
    F: PlaneFitter,
{
    let mut workflow = Workflow::new(pipeline, source, stop);
    if args.visualize {
        info!(
            "streaming results to {}:{}",
            args.v_server_address, args.v_server_port
        );
        workflow = workflow.with_streamer(ResultStreamer::new(
            args.v_server_address.clone(),
            args.v_server_port,
        ));
    }
    if args.rounds > 0 {
        workflow = workflow.with_max_rounds(args.rounds);
    }

    let results = workflow.run();
    info!("measurement stopped after {} results", results);
}
