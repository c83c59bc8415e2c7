pub mod booking;
pub mod session;

pub use booking::*;
pub use session::*;
