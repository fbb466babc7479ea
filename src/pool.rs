// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Fixed-capacity buffer pools bound to one device queue.
//!
//! A [`BufferPool`] owns a dense array of slots whose indices match the
//! buffer indices registered with the device. Buffers leave the pool through
//! [`BufferPool::checkout`] as a [`PooledBuffer`], which holds only a weak
//! reference back to the pool. Giving the handle back, explicitly with
//! [`PooledBuffer::release`] or implicitly by dropping it, places the buffer
//! in the first empty slot and enqueues it on the device again.
//!
//! Pools and handles are single threaded, the slot array sits behind a
//! `RefCell` shared through an `Rc`.

use crate::{
    device::{BufferKind, BufferMetadata, VideoDevice},
    error::{Error, Result},
    shm::{Allocator, SharedBuffer},
};
use std::{
    cell::RefCell,
    fmt,
    mem::ManuallyDrop,
    rc::{Rc, Weak},
};
use tracing::{debug, error, warn};

enum Slot {
    /// Nothing stored; the buffer is checked out or was never filled.
    Empty,
    /// Buffer held by the pool. `queued` is false when the device refused
    /// the enqueue or ended the stream on it.
    Occupied { buffer: SharedBuffer, queued: bool },
    /// Queued on the device by another pool's handle, see
    /// [`BufferPool::enqueue_external`].
    External,
}

struct PoolShared {
    kind: BufferKind,
    device: Rc<dyn VideoDevice>,
    slots: RefCell<Vec<Slot>>,
}

impl PoolShared {
    fn capacity(&self) -> usize {
        self.slots.borrow().len()
    }

    fn first_empty(&self) -> Option<usize> {
        self.slots
            .borrow()
            .iter()
            .position(|slot| matches!(slot, Slot::Empty))
    }

    fn return_buffer(&self, buffer: SharedBuffer) -> Result<()> {
        let Some(index) = self.first_empty() else {
            error!(
                "{} pool exhausted, dropping returned buffer {}",
                self.kind, buffer
            );
            return Err(Error::PoolExhausted {
                kind: self.kind,
                capacity: self.capacity(),
            });
        };

        let res = self.device.enqueue(self.kind, index as u32, &buffer, None);
        let queued = res.is_ok();
        self.slots.borrow_mut()[index] = Slot::Occupied { buffer, queued };
        res
    }

    fn take(&self, index: u32) -> Result<SharedBuffer> {
        let mut slots = self.slots.borrow_mut();
        let vacant = Error::SlotVacant {
            kind: self.kind,
            index,
        };
        let Some(slot) = slots.get_mut(index as usize) else {
            return Err(vacant);
        };
        match std::mem::replace(slot, Slot::Empty) {
            Slot::Occupied { buffer, .. } => Ok(buffer),
            other => {
                *slot = other;
                Err(vacant)
            }
        }
    }
}

/// Ownership state of a [`PooledBuffer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleState {
    /// The handle still owns its buffer.
    Holding,
    /// The buffer went back to its pool, or was dropped with it.
    Released,
}

/// A buffer checked out of a [`BufferPool`].
///
/// The handle is move-only. It owns the buffer until it is released, after
/// which the buffer belongs to the pool it was checked out from. If that pool
/// no longer exists the buffer is simply dropped.
pub struct PooledBuffer {
    buffer: ManuallyDrop<SharedBuffer>,
    pool: Weak<PoolShared>,
    kind: BufferKind,
    slot: u32,
    state: HandleState,
}

impl PooledBuffer {
    fn new(buffer: SharedBuffer, pool: Weak<PoolShared>, kind: BufferKind, slot: u32) -> Self {
        Self {
            buffer: ManuallyDrop::new(buffer),
            pool,
            kind,
            slot,
            state: HandleState::Holding,
        }
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut SharedBuffer {
        &mut self.buffer
    }

    /// Kind of the pool the buffer came from.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Slot the buffer occupied when it was checked out.
    pub fn origin_slot(&self) -> u32 {
        self.slot
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    fn take(&mut self) -> Option<SharedBuffer> {
        match self.state {
            HandleState::Holding => {
                self.state = HandleState::Released;
                // SAFETY: guarded by `state`, the buffer is taken at most once.
                Some(unsafe { ManuallyDrop::take(&mut self.buffer) })
            }
            HandleState::Released => None,
        }
    }

    /// Hands the buffer back to its origin pool, which enqueues it on the
    /// device again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool has no empty slot, or the
    /// device error if the enqueue fails. In the latter case the buffer stays
    /// in the pool.
    pub fn release(mut self) -> Result<()> {
        let Some(buffer) = self.take() else {
            return Ok(());
        };
        match self.pool.upgrade() {
            Some(pool) => pool.return_buffer(buffer),
            None => {
                debug!("{} pool gone, dropping {}", self.kind, buffer);
                Ok(())
            }
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(buffer) = self.take() else {
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            debug!("{} pool gone, dropping {}", self.kind, buffer);
            return;
        };
        if let Err(e) = pool.return_buffer(buffer) {
            error!("{} buffer from slot {} not returned: {}", self.kind, self.slot, e);
            if e.is_fatal() && !std::thread::panicking() {
                panic!("{e}");
            }
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PooledBuffer");
        d.field("kind", &self.kind)
            .field("slot", &self.slot)
            .field("state", &self.state);
        if self.state == HandleState::Holding {
            d.field("buffer", &*self.buffer);
        }
        d.finish()
    }
}

/// The set of shared buffers registered with one device queue.
pub struct BufferPool {
    shared: Rc<PoolShared>,
}

impl BufferPool {
    /// Registers `capacity` shared-memory buffers with the `kind` queue of
    /// `device`.
    ///
    /// Pools which own their buffers allocate `capacity` buffers of
    /// `buffer_size` bytes from `allocator` and enqueue each at its slot.
    /// Transform input pools start empty and only carry handoffs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferRequest`] if the device accepts fewer buffers
    /// than requested or cannot back them with shared memory. Allocation and
    /// enqueue failures are propagated as is.
    pub fn create(
        device: Rc<dyn VideoDevice>,
        kind: BufferKind,
        capacity: u32,
        buffer_size: usize,
        allocator: &Rc<dyn Allocator>,
    ) -> Result<Self> {
        let registration = device.register_buffers(kind, capacity)?;
        if registration.count == 0 || registration.count < capacity {
            return Err(Error::BufferRequest {
                kind,
                count: capacity,
                reason: format!("device accepted {}", registration.count),
            });
        }
        if registration.count > capacity {
            debug!(
                "{} device accepted {} buffers, using {}",
                kind, registration.count, capacity
            );
        }
        match registration.supports_shared_memory() {
            Some(false) => {
                return Err(Error::BufferRequest {
                    kind,
                    count: capacity,
                    reason: "queue does not support dma-buf memory".to_owned(),
                })
            }
            None => debug!("{} queue does not report buffer capabilities", kind),
            Some(true) => {}
        }

        let mut slots = Vec::with_capacity(capacity as usize);
        if kind.owns_buffers() {
            for index in 0..capacity {
                let buffer = SharedBuffer::allocate(allocator, buffer_size, &format!("{kind}_{index}"))?;
                device.enqueue(kind, index, &buffer, None)?;
                slots.push(Slot::Occupied {
                    buffer,
                    queued: true,
                });
            }
        } else {
            slots.resize_with(capacity as usize, || Slot::Empty);
        }

        debug!(
            "created {} pool capacity {} buffer size {}",
            kind, capacity, buffer_size
        );
        Ok(Self {
            shared: Rc::new(PoolShared {
                kind,
                device,
                slots: RefCell::new(slots),
            }),
        })
    }

    /// Blocks until the device completes a buffer and checks it out.
    ///
    /// # Errors
    ///
    /// See [`BufferPool::checkout_with_metadata`].
    pub fn checkout(&self) -> Result<PooledBuffer> {
        self.checkout_with_metadata().map(|(handle, _)| handle)
    }

    /// Blocks until the device completes a buffer and checks it out along
    /// with the attributes the device reported for it.
    ///
    /// # Errors
    ///
    /// - [`Error::Dequeue`] if the device dequeue fails.
    /// - [`Error::SlotVacant`] if the device reports a slot the pool does not
    ///   hold.
    /// - [`Error::BufferCorrupted`] if the device flagged the buffer. The
    ///   buffer is enqueued again.
    /// - [`Error::StreamEnded`] on the last buffer of the stream. The buffer
    ///   stays in its slot.
    pub fn checkout_with_metadata(&self) -> Result<(PooledBuffer, BufferMetadata)> {
        let shared = &self.shared;
        let dequeued = shared.device.dequeue(shared.kind)?;
        let index = dequeued.index();
        let buffer = shared.take(index)?;

        if dequeued.flags.is_error() {
            if let Err(e) = shared.return_buffer(buffer) {
                warn!("{} could not recycle corrupted slot {}: {}", shared.kind, index, e);
            }
            return Err(Error::BufferCorrupted {
                kind: shared.kind,
                index,
            });
        }

        if dequeued.flags.is_last() {
            shared.slots.borrow_mut()[index as usize] = Slot::Occupied {
                buffer,
                queued: false,
            };
            return Err(Error::StreamEnded {
                kind: shared.kind,
                index,
            });
        }

        let handle = PooledBuffer::new(buffer, Rc::downgrade(&self.shared), shared.kind, index);
        Ok((handle, dequeued.metadata))
    }

    /// Gives `handle` back to the pool it was checked out from.
    ///
    /// # Errors
    ///
    /// See [`PooledBuffer::release`].
    pub fn return_handle(&self, handle: PooledBuffer) -> Result<()> {
        if !Weak::ptr_eq(&handle.pool, &Rc::downgrade(&self.shared)) {
            warn!(
                "{} handle returned through the {} pool",
                handle.kind, self.shared.kind
            );
        }
        handle.release()
    }

    /// Places `buffer` in the first empty slot and enqueues it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if every slot is already filled. The
    /// buffer is dropped in that case.
    pub fn return_buffer(&self, buffer: SharedBuffer) -> Result<()> {
        self.shared.return_buffer(buffer)
    }

    /// Queues the buffer held by `handle`, which belongs to another pool, on
    /// this pool's device together with `metadata`.
    ///
    /// The handle keeps ownership. The slot stays reserved until
    /// [`BufferPool::complete_external`] confirms the device is done with it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no slot is free and the device
    /// error if the enqueue fails.
    pub fn enqueue_external(&self, handle: &PooledBuffer, metadata: &BufferMetadata) -> Result<()> {
        let shared = &self.shared;
        let Some(index) = shared.first_empty() else {
            return Err(Error::PoolExhausted {
                kind: shared.kind,
                capacity: shared.capacity(),
            });
        };
        shared
            .device
            .enqueue(shared.kind, index as u32, handle.buffer(), Some(metadata))?;
        shared.slots.borrow_mut()[index] = Slot::External;
        debug!(
            "{} slot {} carries {} slot {}",
            shared.kind,
            index,
            handle.kind(),
            handle.origin_slot()
        );
        Ok(())
    }

    /// Blocks until the device has consumed an externally queued buffer and
    /// frees its slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dequeue`] if the dequeue fails and
    /// [`Error::SlotVacant`] if the device reports a slot that carries no
    /// external buffer.
    pub fn complete_external(&self) -> Result<BufferMetadata> {
        let shared = &self.shared;
        let dequeued = shared.device.dequeue(shared.kind)?;
        let index = dequeued.index();
        {
            let mut slots = shared.slots.borrow_mut();
            match slots.get_mut(index as usize) {
                Some(slot) if matches!(slot, Slot::External) => *slot = Slot::Empty,
                _ => {
                    return Err(Error::SlotVacant {
                        kind: shared.kind,
                        index,
                    })
                }
            }
        }
        if dequeued.flags.is_error() {
            warn!("{} slot {} consumed with an error", shared.kind, index);
        }
        Ok(dequeued.metadata)
    }

    /// Slots holding a buffer owned by the pool, queued on the device or not.
    pub fn occupied(&self) -> usize {
        self.shared
            .slots
            .borrow()
            .iter()
            .filter(|slot| matches!(slot, Slot::Occupied { .. }))
            .count()
    }

    /// Slots whose buffer is held by the pool and queued on the device.
    pub fn queued(&self) -> usize {
        self.shared
            .slots
            .borrow()
            .iter()
            .filter(|slot| matches!(slot, Slot::Occupied { queued: true, .. }))
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Slots carrying a buffer that belongs to another pool.
    pub fn in_flight_external(&self) -> usize {
        self.shared
            .slots
            .borrow()
            .iter()
            .filter(|slot| matches!(slot, Slot::External))
            .count()
    }

    pub fn kind(&self) -> BufferKind {
        self.shared.kind
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        debug!(
            "{} pool dropped with {} of {} buffers",
            self.shared.kind,
            self.occupied(),
            self.capacity()
        );
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("kind", &self.shared.kind)
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .field("queued", &self.queued())
            .field("external", &self.in_flight_external())
            .finish()
    }
}
