// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, Operation, Result},
    shm::SharedBuffer,
};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::{
    fmt,
    fs::File,
    io,
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd},
        unix::fs::OpenOptionsExt,
    },
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, warn};
use unix_ts::Timestamp;
use v4l2r::{
    bindings::{
        self, v4l2_captureparm, v4l2_fract, v4l2_outputparm, v4l2_requestbuffers,
        v4l2_streamparm, v4l2_streamparm__bindgen_ty_1,
    },
    ioctl::{
        self, Capabilities, Capability, MemoryConsistency, QBufPlane, QBuffer, QueryBuffer,
        V4l2Buffer,
    },
    memory::{DmaBufHandle, MemoryType},
    Format as V4l2Format, PixelFormat, QueueType,
};

/// Role of a device queue in the pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Frames produced by the capture source.
    Capture,
    /// Frames handed to the transform device for consumption.
    TransformInput,
    /// Results produced by the transform device.
    TransformOutput,
}

impl BufferKind {
    /// Whether pools of this kind allocate and pre-fill their own buffers.
    pub fn owns_buffers(self) -> bool {
        !matches!(self, BufferKind::TransformInput)
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BufferKind::Capture => "capture",
            BufferKind::TransformInput => "transform-input",
            BufferKind::TransformOutput => "transform-output",
        })
    }
}

/// Four character pixel or codec code.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

/// YUYV 4:2:2 packed, the usual USB camera output
pub const YUYV: FourCC = FourCC(*b"YUYV");
/// NV12 4:2:0 semi-planar
pub const NV12: FourCC = FourCC(*b"NV12");
/// RGBA 32-bit
pub const RGBA: FourCC = FourCC(*b"RGBA");
/// H.264 elementary stream
pub const H264: FourCC = FourCC(*b"H264");
/// H.265 elementary stream
pub const HEVC: FourCC = FourCC(*b"HEVC");

impl FourCC {
    /// Byte size of one uncompressed frame, `None` for compressed formats.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            YUYV => Some(pixels * 2),
            NV12 => Some(pixels * 3 / 2),
            RGBA => Some(pixels * 4),
            _ => None,
        }
    }
}

impl From<u32> for FourCC {
    fn from(value: u32) -> Self {
        FourCC(value.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(value: FourCC) -> Self {
        u32::from_le_bytes(value.0)
    }
}

impl From<PixelFormat> for FourCC {
    fn from(value: PixelFormat) -> Self {
        FourCC::from(u32::from(value))
    }
}

impl From<FourCC> for PixelFormat {
    fn from(value: FourCC) -> Self {
        PixelFormat::from(u32::from(value))
    }
}

impl std::str::FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err(format!("fourcc {s:?} must be exactly 4 characters"));
        }
        Ok(FourCC([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

/// Frame format of one queue, as requested or as accepted by the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Format {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub bytes_per_line: u32,
    /// Bytes a buffer must hold for one frame.
    pub size_image: u32,
}

impl Format {
    pub fn new(width: u32, height: u32, pixel_format: FourCC) -> Self {
        Self {
            width,
            height,
            pixel_format,
            bytes_per_line: 0,
            size_image: 0,
        }
    }

    /// Buffer size needed for this format, falling back to the computed
    /// frame size when the device leaves `size_image` unset.
    pub fn buffer_size(&self) -> Option<usize> {
        match self.size_image {
            0 => self.pixel_format.frame_size(self.width, self.height),
            n => Some(n as usize),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} size:{}",
            self.width, self.height, self.pixel_format, self.size_image
        )
    }
}

/// Time per frame as a fraction of a second.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameInterval {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameInterval {
    pub fn from_fps(fps: u32) -> Self {
        Self {
            numerator: 1,
            denominator: fps.max(1),
        }
    }
}

impl fmt::Display for FrameInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Outcome of registering a buffer set with a queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Number of buffers the device accepted.
    pub count: u32,
    /// Raw `V4L2_BUF_CAP_*` capability flags.
    pub capabilities: u32,
}

impl Registration {
    /// Whether the queue can take externally allocated shared memory.
    ///
    /// `None` when the device does not report buffer capabilities at all.
    pub fn supports_shared_memory(&self) -> Option<bool> {
        match self.capabilities {
            0 => None,
            caps => Some(caps & bindings::V4L2_BUF_CAP_SUPPORTS_DMABUF != 0),
        }
    }
}

/// Interlacing or parity of the frame held by a buffer.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Field {
    #[default]
    Any = 0,
    None = 1,
    Top = 2,
    Bottom = 3,
    Interlaced = 4,
    SeqTopBottom = 5,
    SeqBottomTop = 6,
    Alternate = 7,
    InterlacedTopBottom = 8,
    InterlacedBottomTop = 9,
}

impl Field {
    /// Unknown values map to [`Field::Any`].
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => Field::None,
            2 => Field::Top,
            3 => Field::Bottom,
            4 => Field::Interlaced,
            5 => Field::SeqTopBottom,
            6 => Field::SeqBottomTop,
            7 => Field::Alternate,
            8 => Field::InterlacedTopBottom,
            9 => Field::InterlacedBottomTop,
            _ => Field::Any,
        }
    }
}

/// Per-buffer attributes reported by a dequeue and carried into the
/// matching enqueue on the next device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferMetadata {
    /// Queue slot the buffer was dequeued from.
    pub index: u32,
    pub timestamp: Timestamp,
    pub bytes_used: u32,
    pub field: Field,
    pub sequence: u32,
}

impl BufferMetadata {
    pub fn new(index: u32, bytes_used: u32) -> Self {
        Self {
            index,
            timestamp: Timestamp::new(0, 0),
            bytes_used,
            field: Field::None,
            sequence: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }
}

/// Status flags attached to a dequeued buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const LAST: BufferFlags = BufferFlags(bindings::V4L2_BUF_FLAG_LAST);
    pub const ERROR: BufferFlags = BufferFlags(bindings::V4L2_BUF_FLAG_ERROR);

    pub fn from_bits(bits: u32) -> Self {
        BufferFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// The device will produce no further buffers on this queue.
    pub fn is_last(self) -> bool {
        self.0 & bindings::V4L2_BUF_FLAG_LAST != 0
    }

    /// The buffer contents are unreliable.
    pub fn is_error(self) -> bool {
        self.0 & bindings::V4L2_BUF_FLAG_ERROR != 0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        BufferFlags(self.0 | rhs.0)
    }
}

/// A completed buffer returned by [`VideoDevice::dequeue`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub metadata: BufferMetadata,
    pub flags: BufferFlags,
}

impl DequeuedBuffer {
    pub fn index(&self) -> u32 {
        self.metadata.index
    }
}

/// Command set of a streaming video device.
///
/// Every call is blocking. [`VideoDevice::dequeue`] is the only call that
/// may wait on external events such as frame arrival.
pub trait VideoDevice {
    /// Requests a frame format for the `kind` queue and returns the format
    /// the device actually accepted.
    fn negotiate_format(&self, kind: BufferKind, requested: &Format) -> Result<Format>;

    /// Registers `count` externally allocated shared-memory buffers.
    fn register_buffers(&self, kind: BufferKind, count: u32) -> Result<Registration>;

    /// Hands `buffer` to the device at `slot`. Metadata is required on queues
    /// that consume data so the device reads the right byte range.
    fn enqueue(
        &self,
        kind: BufferKind,
        slot: u32,
        buffer: &SharedBuffer,
        metadata: Option<&BufferMetadata>,
    ) -> Result<()>;

    /// Blocks until the device completes a buffer on the `kind` queue.
    fn dequeue(&self, kind: BufferKind) -> Result<DequeuedBuffer>;

    fn stream_on(&self, kind: BufferKind) -> Result<()>;

    fn stream_off(&self, kind: BufferKind) -> Result<()>;

    /// Sets the time per frame of the `kind` queue and returns the accepted
    /// interval.
    fn set_frame_interval(&self, kind: BufferKind, interval: FrameInterval)
        -> Result<FrameInterval>;

    /// Waits up to `timeout` for a buffer to become ready on the `kind`
    /// queue. Returns `false` on timeout.
    fn wait_ready(&self, kind: BufferKind, timeout: Duration) -> Result<bool> {
        let _ = (kind, timeout);
        Ok(true)
    }
}

/// How a device node is opened.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Dequeues block until a buffer completes.
    #[default]
    Blocking,
    /// Dequeues fail with `EAGAIN` when no buffer is ready.
    NonBlocking,
}

/// V4L2 queue types used for each [`BufferKind`] on one device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct QueueLayout {
    capture: QueueType,
    input: QueueType,
    output: QueueType,
}

impl QueueLayout {
    /// Picks single- or multi-planar queues from the device capabilities.
    pub(crate) fn from_capabilities(caps: Capabilities) -> Self {
        let capture = if caps.contains(Capabilities::VIDEO_CAPTURE) {
            QueueType::VideoCapture
        } else if caps.intersects(Capabilities::VIDEO_CAPTURE_MPLANE | Capabilities::VIDEO_M2M_MPLANE)
        {
            QueueType::VideoCaptureMplane
        } else {
            QueueType::VideoCapture
        };

        let single_plane_m2m = !caps
            .intersects(Capabilities::VIDEO_M2M_MPLANE | Capabilities::VIDEO_OUTPUT_MPLANE)
            && caps.intersects(Capabilities::VIDEO_M2M | Capabilities::VIDEO_OUTPUT);
        let (input, output) = if single_plane_m2m {
            (QueueType::VideoOutput, QueueType::VideoCapture)
        } else {
            (QueueType::VideoOutputMplane, QueueType::VideoCaptureMplane)
        };

        Self {
            capture,
            input,
            output,
        }
    }

    pub(crate) fn queue_type(&self, kind: BufferKind) -> QueueType {
        match kind {
            BufferKind::Capture => self.capture,
            BufferKind::TransformInput => self.input,
            BufferKind::TransformOutput => self.output,
        }
    }
}

fn is_output(queue: QueueType) -> bool {
    matches!(queue, QueueType::VideoOutput | QueueType::VideoOutputMplane)
}

/// Errors from the ioctl layer carry their errno in the message.
fn ioctl_error(err: impl fmt::Display) -> io::Error {
    io::Error::other(err.to_string())
}

/// Poll timeout for `timeout`, saturating at the largest value poll(2)
/// accepts.
fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX)
}

fn to_timeval(ts: Timestamp) -> libc::timeval {
    libc::timeval {
        tv_sec: ts.seconds() as libc::time_t,
        tv_usec: ts.subsec(6) as libc::suseconds_t,
    }
}

fn from_timeval(tv: libc::timeval) -> Timestamp {
    Timestamp::new(tv.tv_sec as i64, (tv.tv_usec as u32).saturating_mul(1000))
}

/// One open connection to a V4L2 device node.
///
/// The descriptor is owned exclusively and closed exactly once when the
/// session is dropped. Sessions move but never copy.
pub struct DeviceSession {
    file: File,
    path: PathBuf,
    layout: QueueLayout,
}

impl DeviceSession {
    /// Opens the device node at `path` for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceOpen`] if the node cannot be opened in the
    /// requested mode or does not answer the V4L2 capability query.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let flags = match mode {
            OpenMode::Blocking => 0,
            OpenMode::NonBlocking => libc::O_NONBLOCK,
        };
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(flags)
            .open(&path)
            .map_err(|source| Error::DeviceOpen {
                path: path.clone(),
                source,
            })?;

        let caps: Capability = ioctl::querycap(&file).map_err(|e| Error::DeviceOpen {
            path: path.clone(),
            source: ioctl_error(e),
        })?;
        let device_caps = caps.device_caps();
        let layout = QueueLayout::from_capabilities(device_caps);

        debug!(
            "opened {} driver {} card {} caps {:?} layout {:?}",
            path.display(),
            caps.driver,
            caps.card,
            device_caps,
            layout
        );

        Ok(Self { file, path, layout })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` with scoped access to the open descriptor.
    pub fn with_connection<R>(&self, op: impl FnOnce(BorrowedFd<'_>) -> R) -> R {
        op(self.file.as_fd())
    }

    fn command<E: fmt::Display>(
        &self,
        operation: Operation,
        kind: BufferKind,
        op: impl FnOnce(BorrowedFd<'_>) -> std::result::Result<(), E>,
    ) -> Result<()> {
        self.with_connection(op)
            .map_err(|e| Error::protocol(operation, kind, ioctl_error(e)))
    }

    fn log_buffer_status(&self, kind: BufferKind, index: u32) {
        let queue = self.layout.queue_type(kind);
        let res: std::result::Result<QueryBuffer, _> =
            self.with_connection(|fd| ioctl::querybuf(&fd, queue, index as usize));
        match res {
            Ok(query) => debug!("{} buffer[{}] {:?}", kind, index, query.flags),
            Err(e) => debug!("{} buffer[{}] query failed: {}", kind, index, e),
        }
    }
}

impl VideoDevice for DeviceSession {
    fn negotiate_format(&self, kind: BufferKind, requested: &Format) -> Result<Format> {
        let queue = self.layout.queue_type(kind);
        let mut fmt: V4l2Format = self
            .with_connection(|fd| ioctl::g_fmt(&fd, queue))
            .map_err(|e| Error::protocol(Operation::NegotiateFormat, kind, ioctl_error(e)))?;

        fmt.width = requested.width;
        fmt.height = requested.height;
        fmt.pixelformat = PixelFormat::from(requested.pixel_format);

        let actual: V4l2Format = self
            .with_connection(|mut fd| ioctl::s_fmt(&mut fd, (queue, &fmt)))
            .map_err(|e| Error::protocol(Operation::NegotiateFormat, kind, ioctl_error(e)))?;

        let plane = actual.plane_fmt.first();
        let accepted = Format {
            width: actual.width,
            height: actual.height,
            pixel_format: FourCC::from(actual.pixelformat),
            bytes_per_line: plane.map_or(0, |p| p.bytesperline),
            size_image: plane.map_or(0, |p| p.sizeimage),
        };

        if accepted.width != requested.width
            || accepted.height != requested.height
            || accepted.pixel_format != requested.pixel_format
        {
            warn!(
                "{} {} requested {} but device set {}",
                self.path.display(),
                kind,
                requested,
                accepted
            );
        }
        debug!("{} {} format {}", self.path.display(), kind, accepted);
        Ok(accepted)
    }

    fn register_buffers(&self, kind: BufferKind, count: u32) -> Result<Registration> {
        let queue = self.layout.queue_type(kind);
        let req: v4l2_requestbuffers = self
            .with_connection(|fd| {
                ioctl::reqbufs(
                    &fd,
                    queue,
                    MemoryType::DmaBuf,
                    count,
                    MemoryConsistency::empty(),
                )
            })
            .map_err(|e| Error::protocol(Operation::RegisterBuffers, kind, ioctl_error(e)))?;

        debug!(
            "{} {} buffers requested {} allocated {} caps {:#x}",
            self.path.display(),
            kind,
            count,
            req.count,
            req.capabilities
        );
        Ok(Registration {
            count: req.count,
            capabilities: req.capabilities,
        })
    }

    fn enqueue(
        &self,
        kind: BufferKind,
        slot: u32,
        buffer: &SharedBuffer,
        metadata: Option<&BufferMetadata>,
    ) -> Result<()> {
        let queue = self.layout.queue_type(kind);
        // The kernel takes its own reference to the DMA-BUF, the duplicate
        // closes once the buffer is queued.
        let dmabuf = buffer
            .handle()
            .try_clone_to_owned()
            .map_err(|e| Error::protocol(Operation::Enqueue, kind, e))?;
        let handle = DmaBufHandle::from(File::from(dmabuf));

        let bytes_used = metadata.map_or(0, |meta| meta.bytes_used);
        let mut plane = QBufPlane::new_from_handle(&handle, bytes_used as _);
        plane.0.length = buffer.size() as u32;

        let mut qbuf: QBuffer<DmaBufHandle<File>> = QBuffer::new(queue, slot);
        if let Some(meta) = metadata {
            qbuf.field = meta.field as u32;
            qbuf.timestamp = to_timeval(meta.timestamp).into();
        }
        qbuf.planes = vec![plane];

        self.command(Operation::Enqueue, kind, |fd| {
            ioctl::qbuf::<_, ()>(&fd, qbuf)
        })?;

        debug!("{} queued {} at slot {}", kind, buffer, slot);
        if tracing::enabled!(tracing::Level::DEBUG) {
            self.log_buffer_status(kind, slot);
        }
        Ok(())
    }

    fn dequeue(&self, kind: BufferKind) -> Result<DequeuedBuffer> {
        let queue = self.layout.queue_type(kind);
        let dqbuf: V4l2Buffer = self
            .with_connection(|fd| ioctl::dqbuf(&fd, queue))
            .map_err(|e| Error::Dequeue {
                kind,
                source: ioctl_error(e),
            })?;

        let raw = dqbuf.as_v4l2_buffer();
        let bytes_used = dqbuf
            .planes_iter()
            .next()
            .map_or(0, |plane| *plane.bytesused);
        let flags = BufferFlags::from_bits(raw.flags);
        if flags.is_last() {
            warn!("{} last buffer reached", kind);
        }
        if flags.is_error() {
            error!("{} buffer {} completed with an error", kind, raw.index);
        }
        debug!(
            "{} dequeued slot {} bytesused {} field {}",
            kind, raw.index, bytes_used, raw.field
        );

        let timestamp = from_timeval(libc::timeval {
            tv_sec: raw.timestamp.tv_sec as libc::time_t,
            tv_usec: raw.timestamp.tv_usec as libc::suseconds_t,
        });
        Ok(DequeuedBuffer {
            metadata: BufferMetadata {
                index: raw.index,
                timestamp,
                bytes_used,
                field: Field::from_raw(raw.field),
                sequence: raw.sequence,
            },
            flags,
        })
    }

    fn stream_on(&self, kind: BufferKind) -> Result<()> {
        let queue = self.layout.queue_type(kind);
        self.command(Operation::StreamOn, kind, |fd| ioctl::streamon(&fd, queue))?;
        debug!("{} {} stream on", self.path.display(), kind);
        Ok(())
    }

    fn stream_off(&self, kind: BufferKind) -> Result<()> {
        let queue = self.layout.queue_type(kind);
        self.command(Operation::StreamOff, kind, |fd| ioctl::streamoff(&fd, queue))?;
        debug!("{} {} stream off", self.path.display(), kind);
        Ok(())
    }

    fn set_frame_interval(
        &self,
        kind: BufferKind,
        interval: FrameInterval,
    ) -> Result<FrameInterval> {
        let queue = self.layout.queue_type(kind);
        let timeperframe = v4l2_fract {
            numerator: interval.numerator,
            denominator: interval.denominator,
        };

        // SAFETY: the parameter structs are plain old data, all zeroes is valid.
        let mut params: v4l2_streamparm = unsafe { std::mem::zeroed() };
        params.type_ = queue as u32;
        params.parm = if is_output(queue) {
            v4l2_streamparm__bindgen_ty_1 {
                output: v4l2_outputparm {
                    timeperframe,
                    ..unsafe { std::mem::zeroed() }
                },
            }
        } else {
            v4l2_streamparm__bindgen_ty_1 {
                capture: v4l2_captureparm {
                    timeperframe,
                    ..unsafe { std::mem::zeroed() }
                },
            }
        };

        let actual: v4l2_streamparm = self
            .with_connection(|fd| ioctl::s_parm(&fd, params))
            .map_err(|e| Error::protocol(Operation::SetFrameInterval, kind, ioctl_error(e)))?;

        // SAFETY: the driver filled the member matching the queue direction.
        let accepted = unsafe {
            if is_output(queue) {
                actual.parm.output.timeperframe
            } else {
                actual.parm.capture.timeperframe
            }
        };
        let accepted = if accepted.denominator == 0 {
            interval
        } else {
            FrameInterval {
                numerator: accepted.numerator,
                denominator: accepted.denominator,
            }
        };
        debug!("{} {} frame interval {}", self.path.display(), kind, accepted);
        Ok(accepted)
    }

    fn wait_ready(&self, kind: BufferKind, timeout: Duration) -> Result<bool> {
        let events = if is_output(self.layout.queue_type(kind)) {
            PollFlags::POLLOUT
        } else {
            PollFlags::POLLIN
        };
        let mut fds = [PollFd::new(self.file.as_fd(), events)];
        let ready = poll(&mut fds, poll_timeout(timeout))
            .map_err(|e| Error::protocol(Operation::Poll, kind, io::Error::from(e)))?;
        Ok(ready > 0)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        debug!("{} closed", self.path.display());
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("path", &self.path)
            .field("fd", &self.file.as_raw_fd())
            .field("layout", &self.layout)
            .finish()
    }
}
