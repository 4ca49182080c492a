use super::utils::{buffer_entry, uniform_entry};
use crate::layers::ConvGeometry;

use bytemuck::{Pod, Zeroable};

const CONV2D_WGSL: &str = include_str!("conv2d.wgsl");

/// Invocations per workgroup along y; the x extent is one output channel.
pub const CONV_WORKGROUP_Y: u32 = 256;
/// Workgroup memory used by the staged filter tile (256 channels x 3x3 floats).
pub const FILTER_CACHE_BYTES: u32 = 256 * 9 * 4;

/// Compiled convolution kernel plus its binding layout.
#[derive(Debug)]
pub(super) struct Conv2dPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl Conv2dPipeline {
    pub(super) fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("vggnet_conv2d_shader"),
            source: wgpu::ShaderSource::Wgsl(CONV2D_WGSL.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vggnet_conv2d_bgl"),
            entries: &[
                buffer_entry(0, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_entry(2, wgpu::BufferBindingType::Storage { read_only: false }),
                buffer_entry(3, wgpu::BufferBindingType::Storage { read_only: true }),
                uniform_entry(4),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("vggnet_conv2d_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("vggnet_conv2d_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self {
            pipeline,
            bind_group_layout,
        }
    }

    pub(super) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub(super) fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(super) struct Conv2dUniforms {
    in_channels: u32,
    out_channels: u32,
    size: u32,
    image_count: u32,
}

impl Conv2dUniforms {
    /// Fails when a dimension does not fit the kernel's 32-bit indices.
    pub(super) fn try_from_geometry(geometry: &ConvGeometry) -> Option<Self> {
        Some(Self {
            in_channels: u32::try_from(geometry.in_channels).ok()?,
            out_channels: u32::try_from(geometry.out_channels).ok()?,
            size: u32::try_from(geometry.size).ok()?,
            image_count: u32::try_from(geometry.active_count).ok()?,
        })
    }
}

/// Workgroup counts `(x, y)` for a geometry: one column per output channel and
/// enough rows to cover every position of the nominal batch.
pub fn dispatch_grid(geometry: &ConvGeometry) -> (u64, u64) {
    let positions = (geometry.plane() * geometry.batch_size) as u64;
    (
        geometry.out_channels as u64,
        positions.div_ceil(u64::from(CONV_WORKGROUP_Y)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_nominal_batch() {
        let geometry = ConvGeometry {
            in_channels: 3,
            out_channels: 64,
            size: 32,
            batch_size: 256,
            active_count: 16,
        };
        assert_eq!(dispatch_grid(&geometry), (64, 1024));

        let tiny = ConvGeometry {
            in_channels: 512,
            out_channels: 512,
            size: 2,
            batch_size: 1,
            active_count: 1,
        };
        assert_eq!(dispatch_grid(&tiny), (512, 1));
    }

    #[test]
    fn uniforms_carry_active_count() {
        let geometry = ConvGeometry {
            in_channels: 64,
            out_channels: 128,
            size: 16,
            batch_size: 8,
            active_count: 3,
        };
        let uniforms = Conv2dUniforms::try_from_geometry(&geometry).unwrap();
        assert_eq!(
            bytemuck::cast::<_, [u32; 4]>(uniforms),
            [64, 128, 16, 3]
        );
    }
}
