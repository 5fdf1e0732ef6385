//! Hosted reference machine: in-process implementations of the
//! platform and namespace seams, for the demo binary and the tests.

pub mod namespace;
pub mod platform;

pub use namespace::*;
pub use platform::*;
