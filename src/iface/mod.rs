pub mod namespace;
pub mod platform;

pub use namespace::*;
pub use platform::*;
