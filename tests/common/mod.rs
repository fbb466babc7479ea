// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Test doubles shared by the integration tests and benches.
//!
//! [`MemfdAllocator`] backs buffers with anonymous memory files so they can
//! be mapped like DMA-BUFs, and [`MockDevice`] plays both the capture and the
//! encoder side of a pipeline with per-queue FIFOs.

#![allow(dead_code)]

use dmabuf_streamer::{
    device::{
        BufferFlags, BufferKind, BufferMetadata, DequeuedBuffer, Field, Format, FrameInterval,
        Registration, VideoDevice,
    },
    error::{Error, Operation, Result},
    shm::{Allocator, CpuAccess, SharedBuffer, SyncPhase},
};
use nix::sys::{
    memfd::{memfd_create, MemFdCreateFlag},
    mman::{mmap, MapFlags, ProtFlags},
};
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
    ffi::CString,
    fs::File,
    io,
    num::NonZeroUsize,
    os::fd::{BorrowedFd, OwnedFd},
    ptr::NonNull,
    rc::Rc,
    time::Duration,
};
use unix_ts::Timestamp;

/// Buffer capability flags reported by the mock: MMAP and DMABUF.
pub const CAPS_DMABUF: u32 = 0x1 | 0x4;
/// Buffer capability flags of a queue without DMABUF support.
pub const CAPS_MMAP_ONLY: u32 = 0x1;
/// Image size the mock reports for compressed formats.
pub const CODED_SIZE: u32 = 65536;

/// Allocator backed by `memfd_create`, counting live tokens.
#[derive(Default)]
pub struct MemfdAllocator {
    live: Cell<usize>,
    allocations: Cell<usize>,
    syncs: RefCell<Vec<(SyncPhase, CpuAccess)>>,
    pub fail_alloc: Cell<bool>,
    pub fail_map: Cell<bool>,
}

impl MemfdAllocator {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Tokens handed out and not yet released.
    pub fn live(&self) -> usize {
        self.live.get()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn syncs(&self) -> Vec<(SyncPhase, CpuAccess)> {
        self.syncs.borrow().clone()
    }
}

impl Allocator for MemfdAllocator {
    fn alloc(&self, size: usize, name: &str) -> io::Result<OwnedFd> {
        if self.fail_alloc.get() {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        let name = CString::new(name)?;
        let fd = memfd_create(name.as_c_str(), MemFdCreateFlag::MFD_CLOEXEC)?;
        let file = File::from(fd);
        file.set_len(size as u64)?;
        self.live.set(self.live.get() + 1);
        self.allocations.set(self.allocations.get() + 1);
        Ok(OwnedFd::from(file))
    }

    fn release(&self, token: OwnedFd) {
        self.live.set(self.live.get() - 1);
        drop(token);
    }

    fn map(&self, token: BorrowedFd<'_>, offset: usize, size: usize) -> io::Result<NonNull<u8>> {
        if self.fail_map.get() {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        let length = NonZeroUsize::new(size)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        // SAFETY: a fresh shared mapping of a file we own.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                token,
                offset as libc::off_t,
            )
        }?;
        Ok(ptr.cast())
    }

    fn sync(&self, _token: BorrowedFd<'_>, phase: SyncPhase, access: CpuAccess) -> io::Result<()> {
        self.syncs.borrow_mut().push((phase, access));
        Ok(())
    }
}

/// Allocates and maps a buffer, panicking on failure.
pub fn buffer(allocator: &Rc<dyn Allocator>, size: usize, name: &str) -> SharedBuffer {
    SharedBuffer::allocate(allocator, size, name).unwrap()
}

/// One device command as seen by the mock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    NegotiateFormat(BufferKind),
    RegisterBuffers(BufferKind, u32),
    Enqueue {
        kind: BufferKind,
        slot: u32,
        bytes_used: Option<u32>,
    },
    Dequeue(BufferKind, u32),
    StreamOn(BufferKind),
    StreamOff(BufferKind),
    SetFrameInterval(BufferKind),
    WaitReady(BufferKind),
}

/// Call log shared between mocks so ordering across devices can be checked.
pub type CallLog = Rc<RefCell<Vec<Call>>>;

/// Commands whose failure can be injected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MockOp {
    NegotiateFormat,
    RegisterBuffers,
    Enqueue,
    Dequeue,
    StreamOn,
    StreamOff,
}

/// Outcome of one scripted dequeue.
#[derive(Copy, Clone, Debug)]
pub struct Completion {
    /// Slot to complete; the oldest queued slot when `None`.
    pub slot: Option<u32>,
    pub bytes_used: u32,
    pub flags: BufferFlags,
}

impl Completion {
    pub fn slot(slot: u32, bytes_used: u32) -> Self {
        Self {
            slot: Some(slot),
            bytes_used,
            flags: BufferFlags::default(),
        }
    }

    pub fn flagged(flags: BufferFlags) -> Self {
        Self {
            slot: None,
            bytes_used: 0,
            flags,
        }
    }
}

struct Queued {
    slot: u32,
    address: NonNull<u8>,
    size: usize,
    metadata: Option<BufferMetadata>,
}

/// Scripted stand-in for a V4L2 device.
///
/// Every queue is a FIFO of enqueued slots. Dequeues complete the oldest slot
/// unless a [`Completion`] was scripted, and fail with `EAGAIN` when the
/// queue is empty. Transform output completions write `frame<n>` into the
/// buffer the way the encoder's DMA would and carry the timestamp of the
/// oldest consumed input that has not produced an output yet.
pub struct MockDevice {
    log: CallLog,
    queues: RefCell<HashMap<BufferKind, VecDeque<Queued>>>,
    scripts: RefCell<HashMap<BufferKind, VecDeque<Completion>>>,
    failures: RefCell<HashSet<(MockOp, BufferKind)>>,
    not_ready: RefCell<HashSet<BufferKind>>,
    registrations: RefCell<HashMap<BufferKind, Registration>>,
    size_images: RefCell<HashMap<BufferKind, u32>>,
    completed: RefCell<HashMap<BufferKind, u32>>,
    consumed: RefCell<VecDeque<BufferMetadata>>,
    streaming: RefCell<HashSet<BufferKind>>,
}

impl MockDevice {
    pub fn new(log: &CallLog) -> Rc<Self> {
        Rc::new(Self {
            log: Rc::clone(log),
            queues: RefCell::default(),
            scripts: RefCell::default(),
            failures: RefCell::default(),
            not_ready: RefCell::default(),
            registrations: RefCell::default(),
            size_images: RefCell::default(),
            completed: RefCell::default(),
            consumed: RefCell::default(),
            streaming: RefCell::default(),
        })
    }

    pub fn script(&self, kind: BufferKind, completion: Completion) {
        self.scripts
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push_back(completion);
    }

    pub fn fail(&self, op: MockOp, kind: BufferKind) {
        self.failures.borrow_mut().insert((op, kind));
    }

    pub fn recover(&self, op: MockOp, kind: BufferKind) {
        self.failures.borrow_mut().remove(&(op, kind));
    }

    pub fn set_not_ready(&self, kind: BufferKind) {
        self.not_ready.borrow_mut().insert(kind);
    }

    pub fn set_ready(&self, kind: BufferKind) {
        self.not_ready.borrow_mut().remove(&kind);
    }

    /// Inputs consumed whose output has not been dequeued yet.
    pub fn outputs_owed(&self) -> usize {
        self.consumed.borrow().len()
    }

    pub fn set_registration(&self, kind: BufferKind, count: u32, capabilities: u32) {
        self.registrations.borrow_mut().insert(
            kind,
            Registration {
                count,
                capabilities,
            },
        );
    }

    pub fn set_size_image(&self, kind: BufferKind, size: u32) {
        self.size_images.borrow_mut().insert(kind, size);
    }

    /// Slots currently queued on `kind`, oldest first.
    pub fn queued(&self, kind: BufferKind) -> Vec<u32> {
        self.queues
            .borrow()
            .get(&kind)
            .map(|q| q.iter().map(|b| b.slot).collect())
            .unwrap_or_default()
    }

    pub fn is_streaming(&self, kind: BufferKind) -> bool {
        self.streaming.borrow().contains(&kind)
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }

    fn check(&self, op: MockOp, kind: BufferKind) -> io::Result<()> {
        if self.failures.borrow().contains(&(op, kind)) {
            Err(io::Error::from_raw_os_error(libc::EIO))
        } else {
            Ok(())
        }
    }

    fn next_sequence(&self, kind: BufferKind) -> u32 {
        let mut completed = self.completed.borrow_mut();
        let n = completed.entry(kind).or_default();
        let sequence = *n;
        *n += 1;
        sequence
    }
}

/// Payload the mock encoder writes for its `sequence`th output buffer.
pub fn encoded_frame(sequence: u32) -> Vec<u8> {
    format!("frame{sequence:04}").into_bytes()
}

impl VideoDevice for MockDevice {
    fn negotiate_format(&self, kind: BufferKind, requested: &Format) -> Result<Format> {
        self.record(Call::NegotiateFormat(kind));
        self.check(MockOp::NegotiateFormat, kind)
            .map_err(|e| Error::DeviceProtocol {
                operation: Operation::NegotiateFormat,
                kind,
                source: e,
            })?;
        let size_image = match self.size_images.borrow().get(&kind) {
            Some(size) => *size,
            None => requested
                .pixel_format
                .frame_size(requested.width, requested.height)
                .map(|n| n as u32)
                .unwrap_or(CODED_SIZE),
        };
        Ok(Format {
            size_image,
            bytes_per_line: requested.width * 2,
            ..*requested
        })
    }

    fn register_buffers(&self, kind: BufferKind, count: u32) -> Result<Registration> {
        self.record(Call::RegisterBuffers(kind, count));
        self.check(MockOp::RegisterBuffers, kind)
            .map_err(|e| Error::DeviceProtocol {
                operation: Operation::RegisterBuffers,
                kind,
                source: e,
            })?;
        Ok(self
            .registrations
            .borrow()
            .get(&kind)
            .copied()
            .unwrap_or(Registration {
                count,
                capabilities: CAPS_DMABUF,
            }))
    }

    fn enqueue(
        &self,
        kind: BufferKind,
        slot: u32,
        buffer: &SharedBuffer,
        metadata: Option<&BufferMetadata>,
    ) -> Result<()> {
        self.record(Call::Enqueue {
            kind,
            slot,
            bytes_used: metadata.map(|m| m.bytes_used),
        });
        self.check(MockOp::Enqueue, kind)
            .map_err(|e| Error::DeviceProtocol {
                operation: Operation::Enqueue,
                kind,
                source: e,
            })?;
        self.queues
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push_back(Queued {
                slot,
                address: buffer.address(),
                size: buffer.size(),
                metadata: metadata.copied(),
            });
        Ok(())
    }

    fn dequeue(&self, kind: BufferKind) -> Result<DequeuedBuffer> {
        let dequeue_error = |errno| Error::Dequeue {
            kind,
            source: io::Error::from_raw_os_error(errno),
        };
        self.check(MockOp::Dequeue, kind)
            .map_err(|_| dequeue_error(libc::EIO))?;

        let script = self
            .scripts
            .borrow_mut()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        let queued = {
            let mut queues = self.queues.borrow_mut();
            let queue = queues.entry(kind).or_default();
            let position = match script.and_then(|s| s.slot) {
                Some(slot) => queue.iter().position(|b| b.slot == slot),
                None if queue.is_empty() => None,
                None => Some(0),
            };
            position.and_then(|i| queue.remove(i))
        };
        let Some(queued) = queued else {
            return Err(dequeue_error(libc::EAGAIN));
        };

        let sequence = self.next_sequence(kind);
        let (bytes_used, flags) = match script {
            Some(s) => (s.bytes_used, s.flags),
            None => match kind {
                BufferKind::Capture => (queued.size as u32, BufferFlags::default()),
                BufferKind::TransformInput => (
                    queued.metadata.map(|m| m.bytes_used).unwrap_or(0),
                    BufferFlags::default(),
                ),
                BufferKind::TransformOutput => {
                    let frame = encoded_frame(sequence);
                    let len = frame.len().min(queued.size);
                    // SAFETY: the buffer is owned by a pool slot while it is
                    // queued, so the mapping is live and nothing else
                    // references it.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            frame.as_ptr(),
                            queued.address.as_ptr(),
                            len,
                        )
                    };
                    (len as u32, BufferFlags::default())
                }
            },
        };

        let metadata = match queued.metadata {
            Some(meta) => BufferMetadata {
                index: queued.slot,
                bytes_used,
                ..meta
            },
            None => BufferMetadata {
                index: queued.slot,
                timestamp: Timestamp::new(1000 + sequence as i64, 500_000),
                bytes_used,
                field: Field::None,
                sequence,
            },
        };
        let metadata = match kind {
            BufferKind::TransformInput => {
                self.consumed.borrow_mut().push_back(metadata);
                metadata
            }
            BufferKind::TransformOutput => match self.consumed.borrow_mut().pop_front() {
                Some(source) => BufferMetadata {
                    timestamp: source.timestamp,
                    ..metadata
                },
                None => metadata,
            },
            BufferKind::Capture => metadata,
        };
        self.record(Call::Dequeue(kind, queued.slot));
        Ok(DequeuedBuffer { metadata, flags })
    }

    fn stream_on(&self, kind: BufferKind) -> Result<()> {
        self.record(Call::StreamOn(kind));
        self.check(MockOp::StreamOn, kind)
            .map_err(|e| Error::DeviceProtocol {
                operation: Operation::StreamOn,
                kind,
                source: e,
            })?;
        self.streaming.borrow_mut().insert(kind);
        Ok(())
    }

    fn stream_off(&self, kind: BufferKind) -> Result<()> {
        self.record(Call::StreamOff(kind));
        self.check(MockOp::StreamOff, kind)
            .map_err(|e| Error::DeviceProtocol {
                operation: Operation::StreamOff,
                kind,
                source: e,
            })?;
        self.streaming.borrow_mut().remove(&kind);
        Ok(())
    }

    fn set_frame_interval(
        &self,
        kind: BufferKind,
        interval: FrameInterval,
    ) -> Result<FrameInterval> {
        self.record(Call::SetFrameInterval(kind));
        Ok(interval)
    }

    fn wait_ready(&self, kind: BufferKind, _timeout: Duration) -> Result<bool> {
        self.record(Call::WaitReady(kind));
        Ok(!self.not_ready.borrow().contains(&kind))
    }
}
