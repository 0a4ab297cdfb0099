//! Access to the Linux `/proc` filesystem for the default samplers.
//!
//! Reads go through the [`FileSystem`] trait so samplers can run against
//! [`MockFs`] in tests. Parsers are pure functions over file contents.

mod fs;
mod mock;
pub mod parser;

pub use fs::{FileSystem, RealFs};
pub use mock::MockFs;
pub use parser::ParseError;

/// Clock ticks per second (USER_HZ). Standard value for Linux and Android.
pub const CLK_TCK: u64 = 100;

/// Converts clock ticks to milliseconds.
pub fn ticks_to_ms(ticks: u64) -> u64 {
    ticks * 1000 / CLK_TCK
}
