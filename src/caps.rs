// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    device::{BufferKind, DeviceSession, FourCC, OpenMode, QueueLayout},
    error::{Error, Operation, Result},
};
use std::{fmt, path::Path};
use tracing::info;
use v4l2r::{
    bindings::{self, v4l2_fmtdesc},
    ioctl::{self, Capabilities as CapabilityFlags, Capability, FormatIterator},
};

/// One pixel format a queue can produce or consume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatDescription {
    pub pixel_format: FourCC,
    pub description: String,
    pub flags: u32,
}

impl FormatDescription {
    /// Whether the format is a compressed bitstream.
    pub fn is_compressed(&self) -> bool {
        self.flags & bindings::V4L2_FMT_FLAG_COMPRESSED != 0
    }
}

impl From<v4l2_fmtdesc> for FormatDescription {
    fn from(desc: v4l2_fmtdesc) -> Self {
        let end = desc
            .description
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(desc.description.len());
        Self {
            pixel_format: FourCC::from(desc.pixelformat),
            description: String::from_utf8_lossy(&desc.description[..end]).into_owned(),
            flags: desc.flags,
        }
    }
}

impl fmt::Display for FormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pixel_format, self.description)
    }
}

/// Identity and capabilities of a device and one of its queues.
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    /// Capabilities of the opened device node.
    pub capabilities: CapabilityFlags,
    pub kind: BufferKind,
    pub formats: Vec<FormatDescription>,
}

impl Capabilities {
    pub fn supports_streaming(&self) -> bool {
        self.capabilities.contains(CapabilityFlags::STREAMING)
    }

    /// Kernel version encoded as `major.minor.patch`.
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            (self.version >> 16) & 0xff,
            (self.version >> 8) & 0xff,
            self.version & 0xff
        )
    }
}

/// Opens the device at `path` and reports its identity along with the pixel
/// formats its `kind` queue enumerates.
///
/// # Errors
///
/// Returns [`Error::DeviceOpen`] if the device cannot be opened and
/// [`Error::DeviceProtocol`] if the capability query fails. Enumeration
/// stops at the first format the driver refuses to describe.
pub fn inspect(path: impl AsRef<Path>, kind: BufferKind) -> Result<Capabilities> {
    let session = DeviceSession::open(path, OpenMode::NonBlocking)?;

    let caps: Capability = session
        .with_connection(|fd| ioctl::querycap(&fd))
        .map_err(|e| {
            Error::protocol(
                Operation::QueryCapabilities,
                kind,
                std::io::Error::other(e.to_string()),
            )
        })?;
    let capabilities = caps.device_caps();

    let queue = QueueLayout::from_capabilities(capabilities).queue_type(kind);
    let formats = session.with_connection(|fd| {
        FormatIterator::new(&fd, queue)
            .map(FormatDescription::from)
            .collect::<Vec<_>>()
    });

    let caps = Capabilities {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus_info,
        version: caps.version,
        capabilities,
        kind,
        formats,
    };

    info!(
        "{}: driver {} card {} bus {} version {}",
        session.path().display(),
        caps.driver,
        caps.card,
        caps.bus_info,
        caps.version_string()
    );
    info!(
        "{}: capabilities {:?} streaming {}",
        session.path().display(),
        caps.capabilities,
        caps.supports_streaming()
    );
    for format in &caps.formats {
        info!("{}: {} format {}", session.path().display(), kind, format);
    }

    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_version() {
        let caps = Capabilities {
            driver: "uvcvideo".into(),
            card: "USB Camera".into(),
            bus_info: "usb-xhci-1".into(),
            version: (6 << 16) | (6 << 8) | 23,
            capabilities: CapabilityFlags::VIDEO_CAPTURE | CapabilityFlags::STREAMING,
            kind: BufferKind::Capture,
            formats: vec![],
        };
        assert_eq!(caps.version_string(), "6.6.23");
        assert!(caps.supports_streaming());
    }

    #[test]
    fn kernel_format_description() {
        // SAFETY: v4l2_fmtdesc is plain old data, all zeroes is valid.
        let mut desc: v4l2_fmtdesc = unsafe { std::mem::zeroed() };
        desc.pixelformat = u32::from(crate::device::H264);
        desc.flags = bindings::V4L2_FMT_FLAG_COMPRESSED;
        desc.description[..5].copy_from_slice(b"H.264");

        let format = FormatDescription::from(desc);
        assert_eq!(format.pixel_format, crate::device::H264);
        assert_eq!(format.description, "H.264");
        assert!(format.is_compressed());
        assert_eq!(format.to_string(), "H264 (H.264)");
    }

    #[test]
    fn missing_device_is_reported() {
        let err = inspect("/nonexistent/video42", BufferKind::Capture).unwrap_err();
        assert!(matches!(err, Error::DeviceOpen { .. }));
    }
}
