use crate::error::IoError;
use crate::source::SectorSource;

/// A [`SectorSource`] that translates offsets into a byte-range window
/// of a parent source and refuses reads that would cross that window.
///
/// Used by the partition dispatcher (spec §4.4) when recursing into a
/// nested table (e.g. a BSD disklabel inside a DOS partition): the
/// child prober only ever sees its own partition's bytes, and any
/// attempt to read past the end of that partition surfaces as
/// [`IoError::WindowOverflow`] rather than silently reading into a
/// sibling partition.
pub struct WindowedSource<'a> {
    parent: &'a dyn SectorSource,
    start: u64,
    len: u64,
    sector_size: u32,
}

impl<'a> WindowedSource<'a> {
    /// Creates a window `[start, start+len)` (in bytes) over `parent`.
    /// `sector_size` is inherited from the parent unless overridden,
    /// since a nested table is always read through the same device.
    pub fn new(parent: &'a dyn SectorSource, start: u64, len: u64) -> Self {
        Self {
            parent,
            start,
            len,
            sector_size: parent.logical_sector_size(),
        }
    }

    pub fn window_start(&self) -> u64 {
        self.start
    }

    pub fn window_end(&self) -> u64 {
        self.start + self.len
    }
}

impl SectorSource for WindowedSource<'_> {
    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        let end = offset.checked_add(len as u64).ok_or(IoError::WindowOverflow {
            offset,
            len,
            window_start: self.start,
            window_end: self.window_end(),
        })?;
        if end > self.len {
            return Err(IoError::WindowOverflow {
                offset,
                len,
                window_start: self.start,
                window_end: self.window_end(),
            });
        }
        self.parent.read_bytes(self.start + offset, len)
    }

    fn total_bytes(&self) -> u64 {
        self.len
    }

    fn logical_sector_size(&self) -> u32 {
        self.sector_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;

    #[test]
    fn translates_offsets_within_window() {
        let parent = InMemorySource::with_default_sector_size((0..=255u8).collect());
        let window = WindowedSource::new(&parent, 100, 50);
        assert_eq!(window.read_bytes(0, 4).unwrap(), vec![100, 101, 102, 103]);
        assert_eq!(window.total_bytes(), 50);
    }

    #[test]
    fn rejects_reads_crossing_the_window() {
        let parent = InMemorySource::with_default_sector_size((0..=255u8).collect());
        let window = WindowedSource::new(&parent, 100, 50);
        assert!(matches!(
            window.read_bytes(40, 20),
            Err(IoError::WindowOverflow { .. })
        ));
    }
}
