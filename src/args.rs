// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use dmabuf_streamer::{
    device::{BufferKind, FourCC, FrameInterval},
    pipeline::PipelineConfig,
    shm::HeapSelection,
};
use std::{path::PathBuf, time::Duration};

/// DMA heap used for frame buffers.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum Heap {
    /// Physically contiguous CMA heap, required by most encoders
    Cma,
    /// Page-backed system heap
    System,
}

impl From<Heap> for HeapSelection {
    fn from(heap: Heap) -> Self {
        match heap {
            Heap::Cma => HeapSelection::Cma,
            Heap::System => HeapSelection::System,
        }
    }
}

/// Device queue inspected by `--inspect`.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum Queue {
    /// Capture device output
    Capture,
    /// Encoder input
    TransformInput,
    /// Encoder output
    TransformOutput,
}

impl From<Queue> for BufferKind {
    fn from(queue: Queue) -> Self {
        match queue {
            Queue::Capture => BufferKind::Capture,
            Queue::TransformInput => BufferKind::TransformInput,
            Queue::TransformOutput => BufferKind::TransformOutput,
        }
    }
}

/// Command-line arguments for the DMA-BUF streamer.
///
/// Every option can also be given through the environment variable shown in
/// `--help`.
///
/// # Example
///
/// ```bash
/// # Encode 300 frames from a USB camera
/// dmabuf-streamer --capture /dev/video0 --encoder /dev/video11 --frames 300
///
/// # Inspect the formats the encoder accepts
/// dmabuf-streamer --inspect transform-input
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Capture device path
    #[arg(short, long, env = "CAPTURE", default_value = "/dev/video0")]
    pub capture: PathBuf,

    /// Encoder (memory-to-memory transform) device path
    #[arg(short, long, env = "ENCODER", default_value = "/dev/video11")]
    pub encoder: PathBuf,

    /// Capture resolution in pixels (width height)
    #[arg(
        long,
        env = "CAPTURE_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub capture_size: Vec<u32>,

    /// Capture pixel format
    #[arg(long, env = "CAPTURE_FORMAT", default_value = "YUYV")]
    pub capture_format: FourCC,

    /// Encoder output codec
    #[arg(long, env = "CODEC", default_value = "H264")]
    pub codec: FourCC,

    /// Frame rate requested from the encoder
    #[arg(long, env = "FPS", default_value = "30")]
    pub fps: u32,

    /// Number of capture buffers
    #[arg(long, env = "CAPTURE_BUFFERS", default_value = "8")]
    pub capture_buffers: u32,

    /// Number of encoder input slots
    #[arg(long, env = "INPUT_BUFFERS", default_value = "1")]
    pub input_buffers: u32,

    /// Number of encoder output buffers
    #[arg(long, env = "OUTPUT_BUFFERS", default_value = "8")]
    pub output_buffers: u32,

    /// Frames to encode, 0 runs until the stream ends
    #[arg(short, long, env = "FRAMES", default_value = "0")]
    pub frames: u64,

    /// File the encoded elementary stream is appended to
    #[arg(short, long, env = "OUTPUT", default_value = "output.h264")]
    pub output: PathBuf,

    /// DMA heap for frame buffers
    #[arg(long, env = "HEAP", default_value = "cma", value_enum)]
    pub heap: Heap,

    /// Dequeue timeout in milliseconds, waits forever when unset
    #[arg(long, env = "TIMEOUT")]
    pub timeout: Option<u64>,

    /// Print the capabilities and formats of a queue and exit
    #[arg(long, value_enum)]
    pub inspect: Option<Queue>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Forward logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl From<&Args> for PipelineConfig {
    fn from(args: &Args) -> Self {
        Self {
            capture_device: args.capture.clone(),
            transform_device: args.encoder.clone(),
            width: args.capture_size[0],
            height: args.capture_size[1],
            capture_format: args.capture_format,
            output_format: args.codec,
            frame_interval: FrameInterval::from_fps(args.fps),
            capture_buffers: args.capture_buffers,
            input_buffers: args.input_buffers,
            output_buffers: args.output_buffers,
            heap: args.heap.into(),
            dequeue_timeout: args.timeout.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmabuf_streamer::device::{H264, NV12};

    #[test]
    fn defaults_match_pipeline_config() {
        let args = Args::parse_from(["dmabuf-streamer"]);
        assert_eq!(PipelineConfig::from(&args), PipelineConfig::default());
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from([
            "dmabuf-streamer",
            "--capture-size",
            "1920",
            "1080",
            "--capture-format",
            "NV12",
            "--heap",
            "system",
            "--timeout",
            "250",
            "--inspect",
            "transform-input",
        ]);
        let config = PipelineConfig::from(&args);
        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!(config.capture_format, NV12);
        assert_eq!(config.output_format, H264);
        assert_eq!(config.heap, HeapSelection::System);
        assert_eq!(config.dequeue_timeout, Some(Duration::from_millis(250)));
        assert_eq!(args.inspect, Some(Queue::TransformInput));
    }
}
