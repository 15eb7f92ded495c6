use crate::error::IoError;
use std::io::{Read, Seek, SeekFrom};

/// Abstract block-device/image source offering cached-free random
/// access in byte units.
///
/// Implementations must guarantee that bytes returned from a given
/// offset remain stable for the lifetime of the source: probers alias
/// partition-table structs directly over the returned buffers, so a
/// `SectorSource` must not be the kind of thing that relocates its
/// backing storage out from under a caller mid-probe (spec §4.1).
pub trait SectorSource {
    /// Reads exactly `len` bytes starting at byte `offset`.
    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError>;

    /// Total size of the device/image in bytes.
    fn total_bytes(&self) -> u64;

    /// The logical sector size the caller asserted this device uses.
    /// Partition coordinates are always normalized to 512-byte sectors
    /// by prober code; this value is only used to convert on-disk
    /// sector counts into bytes.
    fn logical_sector_size(&self) -> u32;
}

/// An in-memory [`SectorSource`] over an owned byte buffer. The
/// default backend for tests and for in-process image manipulation.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    data: Vec<u8>,
    sector_size: u32,
}

impl InMemorySource {
    pub fn new(data: Vec<u8>, sector_size: u32) -> Self {
        Self { data, sector_size }
    }

    pub fn with_default_sector_size(data: Vec<u8>) -> Self {
        Self::new(data, 512)
    }
}

impl SectorSource for InMemorySource {
    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        let start = usize::try_from(offset).map_err(|_| IoError::OutOfBounds {
            offset,
            len,
            total: self.data.len() as u64,
        })?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(IoError::OutOfBounds {
                offset,
                len,
                total: self.data.len() as u64,
            })?;
        Ok(self.data[start..end].to_vec())
    }

    fn total_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn logical_sector_size(&self) -> u32 {
        self.sector_size
    }
}

/// A [`SectorSource`] backed by an open file/block device. Reads use
/// `pread`-style positioned reads via `Seek`+`Read` under an internal
/// lock so the source can be shared behind a `&self` reference the way
/// probers expect, mirroring the read-only file-descriptor sharing
/// policy from spec §5.
pub struct FileSource {
    file: std::sync::Mutex<std::fs::File>,
    total_bytes: u64,
    sector_size: u32,
}

impl FileSource {
    pub fn open(path: impl AsRef<std::path::Path>, sector_size: u32) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let total_bytes = file.metadata()?.len();
        log::debug!(
            "FileSource::open {} ({} bytes, {} byte sectors)",
            path.display(),
            total_bytes,
            sector_size
        );
        Ok(Self {
            file: std::sync::Mutex::new(file),
            total_bytes,
            sector_size,
        })
    }
}

impl SectorSource for FileSource {
    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        if offset.checked_add(len as u64).is_none_or(|end| end > self.total_bytes) {
            return Err(IoError::OutOfBounds {
                offset,
                len,
                total: self.total_bytes,
            });
        }
        let mut buf = vec![0u8; len];
        let mut guard = self.file.lock().expect("file source mutex poisoned");
        guard
            .seek(SeekFrom::Start(offset))
            .and_then(|_| guard.read_exact(&mut buf))
            .map_err(|source| IoError::Read { offset, len, source })?;
        Ok(buf)
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn logical_sector_size(&self) -> u32 {
        self.sector_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_reads_in_bounds() {
        let src = InMemorySource::with_default_sector_size((0..=255u8).collect());
        assert_eq!(src.read_bytes(10, 4).unwrap(), vec![10, 11, 12, 13]);
        assert_eq!(src.total_bytes(), 256);
        assert_eq!(src.logical_sector_size(), 512);
    }

    #[test]
    fn in_memory_rejects_out_of_bounds() {
        let src = InMemorySource::with_default_sector_size(vec![0; 16]);
        assert!(matches!(
            src.read_bytes(10, 16),
            Err(IoError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn file_source_round_trips() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        tmp.write_all(&(0..=255u8).collect::<Vec<u8>>()).unwrap();
        let src = FileSource::open(tmp.path(), 512).unwrap();
        assert_eq!(src.read_bytes(200, 8).unwrap(), (200..208).collect::<Vec<u8>>());
    }
}
