//! The abstract block-device source partition probers read from (§C2).
//!
//! A [`SectorSource`] is the only way probers ever touch storage: they
//! never open files or devices themselves, which keeps `partmount-part`
//! testable against plain in-memory images.

mod error;
mod source;
mod window;

pub use error::IoError;
pub use source::{FileSource, InMemorySource, SectorSource};
pub use window::WindowedSource;
