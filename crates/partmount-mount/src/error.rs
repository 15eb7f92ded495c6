//! Error kinds shared by every stage of mount composition/orchestration.

use thiserror::Error;

/// Errors surfaced by [`crate::optlist::OptionList`], [`crate::context::MountContext`]
/// and [`crate::hookset`].
#[derive(Debug, Error)]
pub enum MountError {
    #[error("storage unreadable: {0}")]
    Unreadable(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("namespace operation failed: {0}")]
    NamespaceFailure(String),

    #[error("failed to acquire lock on {0}")]
    Locking(String),

    #[error("{0} is already mounted")]
    OnlyOnce(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("anchor hook/option {0:?} not found")]
    AnchorNotFound(String),

    #[error("mount context is not in the required state for this call")]
    NotPrepared,

    #[error("mount syscall failed")]
    Syscall(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, MountError>;
