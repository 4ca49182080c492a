use thiserror::Error;

/// Failures raised while running a convolution on either backend.
///
/// Every variant names the operation that failed so the caller can abort with a
/// useful message; nothing here is retried.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("invalid convolution geometry: {0}")]
    Geometry(String),
    #[error("{operation} expected {expected} values, got {actual}")]
    Length {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{operation} needs a {requested}-byte buffer but the device allows {limit} bytes")]
    BufferTooLarge {
        operation: &'static str,
        requested: u64,
        limit: u64,
    },
    #[error("dispatch of {requested} workgroups along {axis} exceeds the device limit of {limit}")]
    DispatchTooLarge {
        axis: char,
        requested: u64,
        limit: u32,
    },
    #[error("{operation} failed: {description}")]
    Device {
        operation: &'static str,
        description: String,
    },
    #[error("failed to map {operation} buffer: {source}")]
    Map {
        operation: &'static str,
        #[source]
        source: wgpu::BufferAsyncError,
    },
}

impl ComputeError {
    pub(crate) fn device(operation: &'static str, description: impl ToString) -> Self {
        Self::Device {
            operation,
            description: description.to_string(),
        }
    }
}
