// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{device::BufferMetadata, error::Result};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Downstream consumer of transformed frames.
pub trait FrameSink {
    /// Consumes the valid bytes of one transformed frame. The slice is only
    /// valid for the duration of the call.
    fn consume(&mut self, data: &[u8], metadata: &BufferMetadata) -> Result<()>;
}

/// Appends frames to a file as a raw elementary stream, without container
/// framing.
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    bytes_written: u64,
}

impl FileSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::options().create(true).append(true).open(&path)?;
        debug!("writing stream to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            bytes_written: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl FrameSink for FileSink {
    fn consume(&mut self, data: &[u8], _metadata: &BufferMetadata) -> Result<()> {
        self.writer.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("flush of {} failed: {}", self.path.display(), e);
        }
        debug!("{} bytes written to {}", self.bytes_written, self.path.display());
    }
}

/// Collects frames in memory.
impl FrameSink for Vec<u8> {
    fn consume(&mut self, data: &[u8], _metadata: &BufferMetadata) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn file_sink_appends() -> Result<(), Box<dyn Error>> {
        let path = std::env::temp_dir().join(format!("sink-{}.h264", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let meta = BufferMetadata::new(0, 4);

        {
            let mut sink = FileSink::create(&path)?;
            sink.consume(&[0, 0, 0, 1], &meta)?;
            sink.consume(&[0x67, 0x42], &meta)?;
            assert_eq!(sink.bytes_written(), 6);
        }
        {
            let mut sink = FileSink::create(&path)?;
            sink.consume(&[0x68], &meta)?;
        }

        assert_eq!(std::fs::read(&path)?, vec![0, 0, 0, 1, 0x67, 0x42, 0x68]);
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn vec_sink_collects() -> Result<(), Box<dyn Error>> {
        let mut sink: Vec<u8> = Vec::new();
        let meta = BufferMetadata::new(2, 3);
        sink.consume(b"abc", &meta)?;
        sink.consume(b"de", &meta)?;
        assert_eq!(sink, b"abcde");
        Ok(())
    }
}
