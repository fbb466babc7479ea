// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # DMA-BUF Streamer Library
//!
//! This library moves video frames from a V4L2 capture device to a V4L2
//! memory-to-memory encoder without copying them. Frames live in DMA-BUF
//! shared buffers allocated from a Linux DMA heap, and ownership of each
//! buffer is passed between the two devices' queues under a strict protocol.
//!
//! ## Features
//!
//! - **Shared Buffers**: Allocate, name, map and CPU-synchronise DMA heap
//!   buffers through a pluggable [`shm::Allocator`].
//! - **Buffer Pools**: Fixed-capacity pools bound to one device queue. Checked
//!   out buffers return to their pool automatically when dropped.
//! - **Device Sessions**: A small blocking command set over V4L2 covering
//!   format negotiation, buffer registration, queueing and streaming, with
//!   single and multi-planar queues.
//! - **Pipeline**: Capture, encode and persist one frame at a time while never
//!   recycling a capture buffer the encoder may still be reading.
//!
//! ## Example
//!
//! ```no_run
//! use dmabuf_streamer::{
//!     pipeline::{Pipeline, PipelineConfig},
//!     sink::FileSink,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let mut pipeline = Pipeline::open(&config)?;
//! let mut sink = FileSink::create("capture.h264")?;
//!
//! pipeline.start_streaming()?;
//! for _ in 0..300 {
//!     let report = pipeline.next_frame(&mut sink)?;
//!     println!("{report}");
//! }
//! pipeline.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: Kernel 5.10+ with V4L2 DMABUF streaming and `/dev/dma_heap`
//! - **Encoder**: A V4L2 M2M encoder accepting DMABUF on its input queue
//!
//! ## Safety
//!
//! V4L2 commands go through the `v4l2r` ioctl layer. This library uses
//! `unsafe` code for the DMA-BUF ioctls, memory mapping and V4L2 parameter
//! structs. All unsafe operations are confined to the `shm`, `device` and
//! `caps` modules and wrapped with safe APIs.

pub mod caps;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod shm;
pub mod sink;

pub use error::{Error, Result};
