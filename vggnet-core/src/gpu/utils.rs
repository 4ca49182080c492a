use crate::error::ComputeError;

use bytemuck::{Pod, bytes_of};
use pollster::block_on;

pub(super) fn create_uniform_buffer(
    device: &wgpu::Device,
    label: &str,
    data: &impl Pod,
) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;

    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytes_of(data),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub(super) fn buffer_entry(
    binding: u32,
    ty: wgpu::BufferBindingType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(super) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    buffer_entry(binding, wgpu::BufferBindingType::Uniform)
}

/// Run `f` inside validation and out-of-memory error scopes.
///
/// Device errors are reported asynchronously by `wgpu`; popping the scopes
/// turns them into a [`ComputeError::Device`] for `operation`. Whatever `f`
/// returned is dropped on failure.
pub(super) fn scoped<T>(
    device: &wgpu::Device,
    operation: &'static str,
    f: impl FnOnce() -> Result<T, ComputeError>,
) -> Result<T, ComputeError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = f();
    let validation = block_on(device.pop_error_scope());
    let out_of_memory = block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(error) => Err(ComputeError::device(operation, error)),
        None => result,
    }
}

/// Byte size of `elements` floats.
pub(super) fn f32_bytes(elements: usize) -> u64 {
    (elements * size_of::<f32>()) as u64
}
