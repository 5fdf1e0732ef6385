pub mod err;
pub mod handlers;
pub mod host;
pub mod iface;

pub use err::*;
pub use handlers::*;
pub use iface::*;
