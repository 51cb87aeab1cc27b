//! Windows Graphics Capture backend.

pub(crate) mod frame_pool;
pub mod monitor;
pub mod session;
