// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_lidarvol::relay::{Listener, LogRenderer, Renderer, render_loop};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};
use tracing::{error, info};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Receives measurement results and renders the latest one", long_about = None)]
struct RelayArgs {
    /// Address to listen on
    #[arg(long, env, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env, default_value = "5001")]
    port: u16,

    /// Frames waiting for the renderer; newer frames are dropped when full
    #[arg(long, env, default_value = "8", value_parser = clap::value_parser!(u32).range(1..))]
    queue_depth: u32,

    /// launch local rerun viewer
    #[cfg(feature = "rerun")]
    #[arg(short, long)]
    viewer: bool,

    /// record rerun data to file instead of live viewer
    #[cfg(feature = "rerun")]
    #[arg(short, long)]
    record: Option<String>,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    rust_log: LevelFilter,
}

#[cfg(feature = "rerun")]
fn renderer(args: &RelayArgs) -> Result<Box<dyn Renderer>, Box<dyn std::error::Error>> {
    use edgefirst_lidarvol::relay::RerunRenderer;

    let rr = if let Some(record) = &args.record {
        Some(rerun::RecordingStreamBuilder::new("lidarvol").save(record)?)
    } else if args.viewer {
        Some(rerun::RecordingStreamBuilder::new("lidarvol").spawn()?)
    } else {
        None
    };

    Ok(match rr {
        Some(rr) => Box::new(RerunRenderer::new(rr)),
        None => Box::new(LogRenderer::default()),
    })
}

#[cfg(not(feature = "rerun"))]
fn renderer(_args: &RelayArgs) -> Result<Box<dyn Renderer>, Box<dyn std::error::Error>> {
    Ok(Box::new(LogRenderer::default()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = RelayArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.rust_log.into())
                .from_env_lossy(),
        )
        .init();

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        s.store(true, Ordering::Relaxed);
    })?;

    let mut renderer = renderer(&args)?;
    let (tx, rx) = kanal::bounded(args.queue_depth as usize);
    let listener = Listener::bind((args.host.as_str(), args.port), tx, stop.clone())?;

    let handle = thread::Builder::new()
        .name("relay-listener".to_string())
        .spawn(move || listener.run())?;

    render_loop(rx, renderer.as_mut(), &stop);

    stop.store(true, Ordering::Relaxed);
    if handle.join().is_err() {
        error!("listener thread panicked");
    }
    info!("relay stopped");
    Ok(())
}
