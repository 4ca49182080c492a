//! GPU convolution offload.
//!
//! A [`DeviceSession`] is created once per process and compiles the WGSL
//! convolution kernel; a [`ConvDispatcher`] borrows it to run one batched
//! convolution per call with call-scoped [`DeviceBuffer`]s.

mod buffer;
pub mod conv2d;
mod dispatch;
mod session;
mod utils;

pub use buffer::DeviceBuffer;
pub use conv2d::{CONV_WORKGROUP_Y, dispatch_grid};
pub use dispatch::ConvDispatcher;
pub use session::DeviceSession;
