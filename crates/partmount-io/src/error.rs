/// Errors surfaced by [`crate::SectorSource`] implementations and by
/// [`crate::WindowedSource`].
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("read of {len} bytes at offset {offset} failed: {source}")]
    Read {
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("read of {len} bytes at offset {offset} is out of bounds (device is {total} bytes)")]
    OutOfBounds { offset: u64, len: usize, total: u64 },
    #[error(
        "windowed read of {len} bytes at offset {offset} crosses the parent window [{window_start}, {window_end})"
    )]
    WindowOverflow {
        offset: u64,
        len: usize,
        window_start: u64,
        window_end: u64,
    },
}
