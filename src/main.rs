// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use dmabuf_streamer::{
    caps,
    device::BufferKind,
    pipeline::{Pipeline, PipelineConfig},
    sink::FileSink,
    Error as StreamError,
};
use std::{error::Error, time::Instant};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};

const FPS_HISTORY: usize = 30;

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_filter(level)),
            Err(e) => {
                eprintln!("journald unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default())
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(level))
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn update_fps(prev: &mut Instant, history: &mut [u64], index: &mut usize) -> u64 {
    let now = Instant::now();
    let elapsed = now.duration_since(*prev).as_nanos().max(1);
    *prev = now;

    history[*index] = (1_000_000_000 / elapsed) as u64;
    *index = (*index + 1) % history.len();

    (history.iter().sum::<u64>() as f64 / history.len() as f64).round() as u64
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    if let Some(queue) = args.inspect {
        let kind = BufferKind::from(queue);
        let path = match kind {
            BufferKind::Capture => &args.capture,
            _ => &args.encoder,
        };
        caps::inspect(path, kind)?;
        return Ok(());
    }

    info!("DMA-BUF Streamer {}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from(&args);
    let mut pipeline = Pipeline::open(&config)?;
    let mut sink = FileSink::create(&args.output)?;

    let requested = (config.width, config.height);
    let format = pipeline.capture_format();
    if (format.width, format.height) != requested {
        warn!(
            "requested {}x{} capture but device set {}x{}",
            requested.0, requested.1, format.width, format.height
        );
    }

    pipeline.start_streaming()?;

    let mut history = vec![0; FPS_HISTORY];
    let mut index = 0;
    let mut prev = Instant::now();

    while args.frames == 0 || pipeline.frames() < args.frames {
        match pipeline.next_frame(&mut sink) {
            Ok(report) => {
                let fps = update_fps(&mut prev, &mut history, &mut index);
                if args.verbose || report.sequence % FPS_HISTORY as u64 == 0 {
                    info!("{} fps: {}", report, fps);
                }
            }
            Err(e @ StreamError::BufferCorrupted { .. }) => warn!("{}", e),
            Err(StreamError::StreamEnded { kind, .. }) => {
                info!("{} stream ended", kind);
                break;
            }
            Err(e) => {
                error!("{}", e);
                return Err(e.into());
            }
        }
    }

    pipeline.stop();
    sink.flush()?;
    info!(
        "wrote {} frames, {} bytes to {}",
        pipeline.frames(),
        sink.bytes_written(),
        sink.path().display()
    );
    Ok(())
}
