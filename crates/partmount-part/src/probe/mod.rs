//! One module per partition-table scheme (spec §4.3).

pub mod aix;
pub mod atari;
pub mod bsd;
pub mod dos;
pub mod gpt;
pub mod sgi;
pub mod sun;

pub use aix::AixProber;
pub use atari::AtariProber;
pub use bsd::BsdProber;
pub use dos::DosProber;
pub use gpt::GptProber;
pub use sgi::SgiProber;
pub use sun::SunProber;
