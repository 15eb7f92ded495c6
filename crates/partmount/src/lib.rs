//! Unified facade over the `partmount` crate family: partition table
//! probing and mount-option composition/orchestration.

pub use partmount_bytes as bytes;
pub use partmount_io as io;

#[cfg(feature = "part")]
pub use partmount_part as part;

#[cfg(feature = "mount")]
pub use partmount_mount as mount;
