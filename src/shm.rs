// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::error::{Error, Result};
use dma_heap::{Heap, HeapKind};
use nix::{
    errno::Errno,
    sys::mman::{mmap, munmap, MapFlags, ProtFlags},
};
use std::{
    ffi::{c_void, CString},
    fmt, io,
    mem::ManuallyDrop,
    num::NonZeroUsize,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    ptr::NonNull,
    rc::Rc,
    slice::{from_raw_parts, from_raw_parts_mut},
};
use tracing::{debug, warn};

mod uapi {
    use nix::{ioctl_write_ptr, ioctl_write_ptr_bad, request_code_write};
    use std::{ffi::c_char, mem::size_of};

    pub const DMA_BUF_SYNC_READ: u64 = 1 << 0;
    pub const DMA_BUF_SYNC_WRITE: u64 = 1 << 1;
    pub const DMA_BUF_SYNC_START: u64 = 0;
    pub const DMA_BUF_SYNC_END: u64 = 1 << 2;

    #[repr(C)]
    pub struct DmaBufSync {
        pub flags: u64,
    }

    ioctl_write_ptr!(dma_buf_ioctl_sync, b'b', 0, DmaBufSync);
    ioctl_write_ptr_bad!(
        dma_buf_set_name,
        request_code_write!(b'b', 1, size_of::<*const c_char>()),
        c_char
    );
}

use uapi::*;

/// Which side of a CPU access window a sync call marks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Start,
    End,
}

/// Direction of a CPU access window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuAccess {
    Read,
    Write,
    ReadWrite,
}

impl CpuAccess {
    fn flags(self) -> u64 {
        match self {
            CpuAccess::Read => DMA_BUF_SYNC_READ,
            CpuAccess::Write => DMA_BUF_SYNC_WRITE,
            CpuAccess::ReadWrite => DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE,
        }
    }
}

/// Source of device-shareable memory.
///
/// An allocation is identified by its token, a file descriptor the device
/// subsystem understands. The default `map`, `unmap` and `sync` work on any
/// mappable descriptor; `sync` issues `DMA_BUF_IOCTL_SYNC` and therefore only
/// applies to real DMA-BUFs.
pub trait Allocator {
    /// Requests a new region of `size` bytes.
    fn alloc(&self, size: usize, name: &str) -> io::Result<OwnedFd>;

    /// Gives the token back to the allocator.
    fn release(&self, token: OwnedFd) {
        drop(token);
    }

    /// Maps `size` bytes of the region at `offset` into the process.
    fn map(&self, token: BorrowedFd<'_>, offset: usize, size: usize) -> io::Result<NonNull<u8>> {
        let length = NonZeroUsize::new(size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "zero length mapping"))?;
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mapping offset overflow"))?;
        // SAFETY: a fresh shared mapping which aliases no Rust object.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                token,
                offset,
            )
        }?;
        Ok(ptr.cast())
    }

    /// Removes a mapping created by [`Allocator::map`].
    ///
    /// # Safety
    ///
    /// `address` and `size` must describe a live mapping returned by `map`
    /// and no reference into it may outlive this call.
    unsafe fn unmap(&self, address: NonNull<u8>, size: usize) -> io::Result<()> {
        munmap(address.cast::<c_void>(), size)?;
        Ok(())
    }

    /// Marks the start or end of a CPU access window on the region.
    ///
    /// Interrupted or busy syncs are retried until they complete.
    fn sync(&self, token: BorrowedFd<'_>, phase: SyncPhase, access: CpuAccess) -> io::Result<()> {
        let phase = match phase {
            SyncPhase::Start => DMA_BUF_SYNC_START,
            SyncPhase::End => DMA_BUF_SYNC_END,
        };
        let sync = DmaBufSync {
            flags: phase | access.flags(),
        };
        loop {
            // SAFETY: `sync` lives across the call and matches the uapi layout.
            match unsafe { dma_buf_ioctl_sync(token.as_raw_fd(), &sync) } {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// DMA heap the kernel allocator draws from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum HeapSelection {
    /// Physically contiguous memory, required by most encoders.
    #[default]
    Cma,
    /// Page-backed system memory.
    System,
}

/// [`Allocator`] backed by a Linux DMA heap (`/dev/dma_heap/*`).
pub struct DmaHeapAllocator {
    heap: Heap,
    selection: HeapSelection,
}

impl DmaHeapAllocator {
    /// Opens the selected DMA heap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceOpen`] if the heap device node is missing or
    /// not accessible.
    pub fn new(selection: HeapSelection) -> Result<Self> {
        let kind = match selection {
            HeapSelection::Cma => HeapKind::Cma,
            HeapSelection::System => HeapKind::System,
        };
        let heap = Heap::new(kind).map_err(|e| Error::DeviceOpen {
            path: format!("dma heap {selection:?}").into(),
            source: io::Error::other(e.to_string()),
        })?;
        debug!("opened {:?} dma heap", selection);
        Ok(Self { heap, selection })
    }

    pub fn selection(&self) -> HeapSelection {
        self.selection
    }
}

impl Allocator for DmaHeapAllocator {
    fn alloc(&self, size: usize, name: &str) -> io::Result<OwnedFd> {
        let fd = self
            .heap
            .allocate(size)
            .map_err(|e| io::Error::other(e.to_string()))?;

        match CString::new(name) {
            // SAFETY: the name outlives the call and the kernel copies it.
            Ok(cname) => match unsafe { dma_buf_set_name(fd.as_raw_fd(), cname.as_ptr()) } {
                Ok(_) => {}
                Err(e) => warn!("could not name dma buffer {}: {}", name, e),
            },
            Err(_) => warn!("dma buffer name {:?} contains a NUL byte", name),
        }

        Ok(fd)
    }
}

/// One mapped region of device-shareable memory.
///
/// The buffer owns both its token and its mapping. Dropping it unmaps the
/// region and then releases the token to the allocator, so every successful
/// [`SharedBuffer::allocate`] is matched by exactly one unmap and one release.
pub struct SharedBuffer {
    token: ManuallyDrop<OwnedFd>,
    address: NonNull<u8>,
    size: usize,
    name: String,
    allocator: Rc<dyn Allocator>,
}

impl SharedBuffer {
    /// Allocates `size` bytes from `allocator` and maps them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the allocator refuses the request and
    /// [`Error::Mapping`] if the new region cannot be mapped. In the latter
    /// case the token is released before returning.
    pub fn allocate(allocator: &Rc<dyn Allocator>, size: usize, name: &str) -> Result<Self> {
        if size == 0 {
            return Err(Error::Allocation {
                size,
                source: io::Error::new(io::ErrorKind::InvalidInput, "zero sized buffer"),
            });
        }

        let token = allocator
            .alloc(size, name)
            .map_err(|source| Error::Allocation { size, source })?;

        let address = match allocator.map(token.as_fd(), 0, size) {
            Ok(address) => address,
            Err(source) => {
                allocator.release(token);
                return Err(Error::Mapping { size, source });
            }
        };

        debug!("allocated shared buffer {} size {}", name, size);
        Ok(Self {
            token: ManuallyDrop::new(token),
            address,
            size,
            name: name.to_owned(),
            allocator: Rc::clone(allocator),
        })
    }

    pub fn handle(&self) -> BorrowedFd<'_> {
        self.token.as_fd()
    }

    pub fn raw_handle(&self) -> RawFd {
        self.token.as_raw_fd()
    }

    pub fn address(&self) -> NonNull<u8> {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Views the mapping without a sync window.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is valid and `size` long until drop.
        unsafe { from_raw_parts(self.address.as_ptr(), self.size) }
    }

    /// Mutable view of the mapping without a sync window.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes the view exclusive.
        unsafe { from_raw_parts_mut(self.address.as_ptr(), self.size) }
    }

    /// Runs `f` over the contents inside a read sync window.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.allocator
            .sync(self.handle(), SyncPhase::Start, CpuAccess::Read)?;
        let out = f(self.as_slice());
        self.allocator
            .sync(self.handle(), SyncPhase::End, CpuAccess::Read)?;
        Ok(out)
    }

    /// Runs `f` over the contents inside a read/write sync window.
    pub fn write<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let allocator = Rc::clone(&self.allocator);
        allocator.sync(self.handle(), SyncPhase::Start, CpuAccess::ReadWrite)?;
        let out = f(self.as_mut_slice());
        allocator.sync(self.handle(), SyncPhase::End, CpuAccess::ReadWrite)?;
        Ok(out)
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        // SAFETY: the mapping came from `map` in `allocate`, and every slice
        // handed out borrows `self`, so none can outlive this point.
        if let Err(e) = unsafe { self.allocator.unmap(self.address, self.size) } {
            warn!("unmap of {} failed: {}", self.name, e);
        }
        // SAFETY: the token is taken exactly once, here.
        let token = unsafe { ManuallyDrop::take(&mut self.token) };
        self.allocator.release(token);
        debug!("shared buffer {} released", self.name);
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("name", &self.name)
            .field("fd", &self.raw_handle())
            .field("size", &self.size)
            .finish()
    }
}

impl fmt::Display for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} bytes fd:{}", self.name, self.size, self.raw_handle())
    }
}
