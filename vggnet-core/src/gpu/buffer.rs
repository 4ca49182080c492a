use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use super::utils::f32_bytes;
use crate::error::ComputeError;

/// Device memory owned for the duration of one dispatch.
///
/// Creating a buffer bumps the session's live-buffer counter; dropping it
/// destroys the allocation immediately and decrements the counter, so every
/// early return from a dispatch releases what was allocated so far.
pub struct DeviceBuffer<'s> {
    buffer: wgpu::Buffer,
    size: u64,
    live: &'s AtomicUsize,
}

impl<'s> DeviceBuffer<'s> {
    /// Allocate an uninitialized buffer of `size` bytes.
    ///
    /// `limit` is the largest size the caller can use for this buffer (the
    /// device's buffer or binding limit).
    pub(super) fn allocate(
        device: &wgpu::Device,
        live: &'s AtomicUsize,
        label: &'static str,
        size: u64,
        limit: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<Self, ComputeError> {
        if size > limit {
            return Err(ComputeError::BufferTooLarge {
                operation: label,
                requested: size,
                limit,
            });
        }
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        Ok(Self::track(buffer, live))
    }

    /// Allocate a storage buffer for `data` and queue a non-blocking upload.
    pub(super) fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        live: &'s AtomicUsize,
        label: &'static str,
        data: &[f32],
        limit: u64,
    ) -> Result<Self, ComputeError> {
        let buffer = Self::allocate(
            device,
            live,
            label,
            f32_bytes(data.len()),
            limit,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        )?;
        queue.write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(data));
        Ok(buffer)
    }

    /// Take ownership of a buffer created elsewhere (e.g. an initialized uniform block).
    pub(super) fn track(buffer: wgpu::Buffer, live: &'s AtomicUsize) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        let size = buffer.size();
        Self { buffer, size, live }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for DeviceBuffer<'_> {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for DeviceBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("size", &self.size)
            .finish()
    }
}
