//! Client-side stubs for talking to the view server.

mod clerk;
mod pinger;

pub use clerk::ViewClerk;
pub use pinger::ViewPinger;
