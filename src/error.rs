// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::device::BufferKind;
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// Device command that produced a [`Error::DeviceProtocol`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    QueryCapabilities,
    NegotiateFormat,
    RegisterBuffers,
    Enqueue,
    StreamOn,
    StreamOff,
    SetFrameInterval,
    Poll,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::QueryCapabilities => "query capabilities",
            Operation::NegotiateFormat => "negotiate format",
            Operation::RegisterBuffers => "register buffers",
            Operation::Enqueue => "enqueue",
            Operation::StreamOn => "stream on",
            Operation::StreamOff => "stream off",
            Operation::SetFrameInterval => "set frame interval",
            Operation::Poll => "poll",
        };
        f.write_str(name)
    }
}

/// Errors raised by the streamer.
///
/// Construction-time variants (`DeviceOpen`, `DeviceProtocol`,
/// `BufferRequest`, `Allocation`, `Mapping`) abort pipeline startup.
/// Per-frame variants (`Dequeue`, `StreamEnded`, `BufferCorrupted`,
/// `Timeout`) abort only the current frame. `PoolExhausted` and `SlotVacant`
/// indicate a broken ownership contract and are reported by
/// [`Error::is_fatal`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open device {path}: {source}")]
    DeviceOpen { path: PathBuf, source: io::Error },

    #[error("{kind} {operation} failed: {source}")]
    DeviceProtocol {
        operation: Operation,
        kind: BufferKind,
        source: io::Error,
    },

    #[error("failed to register {count} {kind} buffers: {reason}")]
    BufferRequest {
        kind: BufferKind,
        count: u32,
        reason: String,
    },

    #[error("failed to allocate {size} byte shared buffer: {source}")]
    Allocation { size: usize, source: io::Error },

    #[error("failed to map {size} byte shared buffer: {source}")]
    Mapping { size: usize, source: io::Error },

    #[error("failed to dequeue {kind} buffer: {source}")]
    Dequeue { kind: BufferKind, source: io::Error },

    #[error("{kind} stream ended at slot {index}")]
    StreamEnded { kind: BufferKind, index: u32 },

    #[error("{kind} buffer at slot {index} flagged as corrupted")]
    BufferCorrupted { kind: BufferKind, index: u32 },

    #[error("{kind} pool exhausted: all {capacity} slots already occupied")]
    PoolExhausted { kind: BufferKind, capacity: usize },

    #[error("device returned {kind} slot {index} which the pool does not hold")]
    SlotVacant { kind: BufferKind, index: u32 },

    #[error("timed out waiting for a {kind} buffer")]
    Timeout { kind: BufferKind },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn protocol(operation: Operation, kind: BufferKind, source: io::Error) -> Self {
        Error::DeviceProtocol {
            operation,
            kind,
            source,
        }
    }

    /// True for ownership contract violations which must stop the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::PoolExhausted { .. } | Error::SlotVacant { .. })
    }
}
