// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    device::{
        BufferKind, BufferMetadata, DeviceSession, Format, FourCC, FrameInterval, OpenMode,
        VideoDevice, H264, YUYV,
    },
    error::{Error, Result},
    pool::{BufferPool, PooledBuffer},
    shm::{Allocator, DmaHeapAllocator, HeapSelection},
    sink::FrameSink,
};
use std::{fmt, path::PathBuf, rc::Rc, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Settings for a capture to transform pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub capture_device: PathBuf,
    pub transform_device: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Pixel format requested from the capture device.
    pub capture_format: FourCC,
    /// Codec requested from the transform device.
    pub output_format: FourCC,
    pub frame_interval: FrameInterval,
    pub capture_buffers: u32,
    pub input_buffers: u32,
    pub output_buffers: u32,
    pub heap: HeapSelection,
    /// Upper bound on each dequeue wait, unbounded when `None`.
    pub dequeue_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_device: PathBuf::from("/dev/video0"),
            transform_device: PathBuf::from("/dev/video11"),
            width: 640,
            height: 480,
            capture_format: YUYV,
            output_format: H264,
            frame_interval: FrameInterval::from_fps(30),
            capture_buffers: 8,
            input_buffers: 1,
            output_buffers: 8,
            heap: HeapSelection::Cma,
            dequeue_timeout: None,
        }
    }
}

/// Outcome of one [`Pipeline::next_frame`] call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// Zero based count of frames completed by the pipeline.
    pub sequence: u64,
    /// Attributes of the captured frame.
    pub capture: BufferMetadata,
    /// Attributes of the transformed frame.
    pub output: BufferMetadata,
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} capture slot {} {} bytes -> output slot {} {} bytes",
            self.sequence,
            self.capture.index,
            self.capture.bytes_used,
            self.output.index,
            self.output.bytes_used
        )
    }
}

/// A captured frame handed to the transform device whose output has not been
/// collected yet.
struct Handoff {
    capture: PooledBuffer,
    metadata: BufferMetadata,
    /// The transform device gave the capture buffer back on its input queue.
    consumed: bool,
}

/// Moves frames from a capture device through a transform device without
/// copying them.
///
/// Each frame is captured into a shared buffer, handed to the transform
/// device's input queue and released back to the capture device only after
/// the transform device has dequeued it from its input queue.
pub struct Pipeline {
    // Frame interrupted by a wait or dequeue failure, resumed by the next
    // call or released once the queues are stopped.
    pending: Option<Handoff>,
    output_pool: BufferPool,
    input_pool: BufferPool,
    capture_pool: BufferPool,
    capture: Rc<dyn VideoDevice>,
    transform: Rc<dyn VideoDevice>,
    capture_format: Format,
    output_format: Format,
    frame_interval: FrameInterval,
    dequeue_timeout: Option<Duration>,
    streaming: bool,
    frames: u64,
}

impl Pipeline {
    /// Opens the configured devices and DMA heap and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Any failure to open a device or the heap, negotiate a format or
    /// register and allocate buffers aborts construction.
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        let capture = DeviceSession::open(&config.capture_device, OpenMode::Blocking)?;
        let transform = DeviceSession::open(&config.transform_device, OpenMode::Blocking)?;
        let allocator: Rc<dyn Allocator> = Rc::new(DmaHeapAllocator::new(config.heap)?);
        Self::new(Rc::new(capture), Rc::new(transform), allocator, config)
    }

    /// Negotiates formats and creates the buffer pools on already opened
    /// devices.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::open`].
    pub fn new(
        capture: Rc<dyn VideoDevice>,
        transform: Rc<dyn VideoDevice>,
        allocator: Rc<dyn Allocator>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let requested = Format::new(config.width, config.height, config.capture_format);
        let capture_format = capture.negotiate_format(BufferKind::Capture, &requested)?;

        let input_format = transform.negotiate_format(BufferKind::TransformInput, &capture_format)?;
        if input_format.pixel_format != capture_format.pixel_format
            || input_format.width != capture_format.width
            || input_format.height != capture_format.height
        {
            warn!(
                "transform input {} does not match capture {}",
                input_format, capture_format
            );
        }

        let requested = Format::new(
            capture_format.width,
            capture_format.height,
            config.output_format,
        );
        let output_format = transform.negotiate_format(BufferKind::TransformOutput, &requested)?;
        let frame_interval =
            transform.set_frame_interval(BufferKind::TransformInput, config.frame_interval)?;

        let capture_size = buffer_size(BufferKind::Capture, &capture_format, config.capture_buffers)?;
        let input_size = input_format.buffer_size().unwrap_or(0);
        let output_size =
            buffer_size(BufferKind::TransformOutput, &output_format, config.output_buffers)?;

        let capture_pool = BufferPool::create(
            Rc::clone(&capture),
            BufferKind::Capture,
            config.capture_buffers,
            capture_size.max(input_size),
            &allocator,
        )?;
        let input_pool = BufferPool::create(
            Rc::clone(&transform),
            BufferKind::TransformInput,
            config.input_buffers,
            0,
            &allocator,
        )?;
        let output_pool = BufferPool::create(
            Rc::clone(&transform),
            BufferKind::TransformOutput,
            config.output_buffers,
            output_size,
            &allocator,
        )?;

        info!(
            "pipeline {} -> {} at {}",
            capture_format, output_format, frame_interval
        );

        Ok(Self {
            pending: None,
            output_pool,
            input_pool,
            capture_pool,
            capture,
            transform,
            capture_format,
            output_format,
            frame_interval,
            dequeue_timeout: config.dequeue_timeout,
            streaming: false,
            frames: 0,
        })
    }

    /// Starts the capture queue, then the transform input queue, then the
    /// transform output queue.
    pub fn start_streaming(&mut self) -> Result<()> {
        // Set first so a partial start is still stopped on teardown.
        self.streaming = true;
        self.capture.stream_on(BufferKind::Capture)?;
        self.transform.stream_on(BufferKind::TransformInput)?;
        self.transform.stream_on(BufferKind::TransformOutput)?;
        info!("streaming started");
        Ok(())
    }

    fn wait(&self, kind: BufferKind) -> Result<()> {
        let Some(timeout) = self.dequeue_timeout else {
            return Ok(());
        };
        let device = match kind {
            BufferKind::Capture => &self.capture,
            _ => &self.transform,
        };
        if device.wait_ready(kind, timeout)? {
            Ok(())
        } else {
            Err(Error::Timeout { kind })
        }
    }

    fn confirm_handoff(&self) -> Result<BufferMetadata> {
        self.wait(BufferKind::TransformInput)?;
        self.input_pool.complete_external()
    }

    /// Moves one frame from the capture device through the transform device
    /// and hands the transformed bytes to `sink`.
    ///
    /// The capture buffer is re-enqueued on the capture device only after the
    /// transform device has given it back on its input queue. When waiting
    /// for that confirmation or for the transformed frame fails, the frame is
    /// held back and the next call resumes it before capturing a new one, so
    /// every report pairs a capture with its own output.
    ///
    /// # Errors
    ///
    /// Per-frame errors abort only the current frame. Errors for which
    /// [`Error::is_fatal`] is true mean the pipeline must be stopped. A frame
    /// handed to `sink` is counted by [`Pipeline::frames`] even when
    /// recycling its buffers fails afterwards.
    #[instrument(skip_all, fields(frame = self.frames))]
    pub fn next_frame(&mut self, sink: &mut dyn FrameSink) -> Result<FrameReport> {
        let mut handoff = match self.pending.take() {
            Some(handoff) => {
                debug!("resuming capture slot {}", handoff.capture.origin_slot());
                handoff
            }
            None => {
                self.wait(BufferKind::Capture)?;
                let (capture, metadata) = self.capture_pool.checkout_with_metadata()?;
                self.input_pool.enqueue_external(&capture, &metadata)?;
                Handoff {
                    capture,
                    metadata,
                    consumed: false,
                }
            }
        };

        if !handoff.consumed {
            if let Err(e) = self.confirm_handoff() {
                self.pending = Some(handoff);
                return Err(e);
            }
            handoff.consumed = true;
        }

        let collected = self
            .wait(BufferKind::TransformOutput)
            .and_then(|_| self.output_pool.checkout_with_metadata());
        let (output, output_meta) = match collected {
            Ok(collected) => collected,
            Err(e @ (Error::Timeout { .. } | Error::Dequeue { .. })) => {
                // Nothing was dequeued, the output is still owed.
                self.pending = Some(handoff);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let used = (output_meta.bytes_used as usize).min(output.buffer().size());
        output
            .buffer()
            .read(|data| sink.consume(&data[..used], &output_meta))??;

        let report = FrameReport {
            sequence: self.frames,
            capture: handoff.metadata,
            output: output_meta,
        };
        self.frames += 1;
        debug!("{}", report);

        output.release()?;
        handoff.capture.release()?;
        Ok(report)
    }

    /// Stops the transform output queue, then the transform input queue,
    /// then the capture queue. Failures are logged and tolerated.
    ///
    /// Buffers stay with their pools and are released when the pipeline is
    /// dropped. A stopped pipeline is not restarted.
    pub fn stop(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;

        let queues = [
            (&self.transform, BufferKind::TransformOutput),
            (&self.transform, BufferKind::TransformInput),
            (&self.capture, BufferKind::Capture),
        ];
        for (device, kind) in queues {
            if let Err(e) = device.stream_off(kind) {
                warn!("{}", e);
            }
        }

        if let Some(stranded) = self.pending.take() {
            debug!(
                "releasing stranded capture slot {}",
                stranded.capture.origin_slot()
            );
            if let Err(e) = stranded.capture.release() {
                warn!("{}", e);
            }
        }
        info!("streaming stopped after {} frames", self.frames);
    }

    pub fn capture_pool(&self) -> &BufferPool {
        &self.capture_pool
    }

    pub fn input_pool(&self) -> &BufferPool {
        &self.input_pool
    }

    pub fn output_pool(&self) -> &BufferPool {
        &self.output_pool
    }

    pub fn capture_format(&self) -> &Format {
        &self.capture_format
    }

    pub fn output_format(&self) -> &Format {
        &self.output_format
    }

    pub fn frame_interval(&self) -> FrameInterval {
        self.frame_interval
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// True while an interrupted frame waits to be resumed.
    pub fn has_stranded_handoff(&self) -> bool {
        self.pending.is_some()
    }
}

fn buffer_size(kind: BufferKind, format: &Format, count: u32) -> Result<usize> {
    format.buffer_size().ok_or_else(|| Error::BufferRequest {
        kind,
        count,
        reason: format!("device reported no image size for {}", format),
    })
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
