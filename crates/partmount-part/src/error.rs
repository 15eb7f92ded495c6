/// Errors a [`crate::Prober`] or the [`crate::Dispatcher`] can return.
///
/// Per spec §4.3.4/§7: a corrupted-but-recognizable signature is never
/// an `Err` — it is [`crate::ProbeOutcome::None`]. Only I/O failures,
/// allocation failures, and the dispatcher's own nested-window-overflow
/// condition are represented here.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("storage read failed: {0}")]
    Io(#[from] partmount_io::IoError),
    #[error("nested probe window overflowed its parent partition")]
    NestedWindowOverflow,
    #[error("extended partition chain exceeded {limit} hops, rejecting as circular")]
    ChainTooLong { limit: u32 },
}
