use super::{
    buffer::DeviceBuffer,
    conv2d::{Conv2dUniforms, dispatch_grid},
    session::DeviceSession,
    utils::{create_uniform_buffer, f32_bytes, scoped},
};
use crate::{
    error::ComputeError,
    layers::{ConvRequest, ConvolutionBackend},
    profile::DispatchStats,
};

use log::trace;
use std::{
    sync::{Arc, atomic::AtomicUsize, mpsc},
    time::{Duration, Instant},
};

const TIMESTAMP_BYTES: u64 = 2 * size_of::<u64>() as u64;

/// Begin/end timestamps of the convolution pass, with the buffers that carry
/// them back to the host.
struct PassTimestamps<'s> {
    query_set: wgpu::QuerySet,
    resolve: DeviceBuffer<'s>,
    readback: DeviceBuffer<'s>,
    period: f32,
}

impl<'s> PassTimestamps<'s> {
    fn new(
        device: &wgpu::Device,
        live: &'s AtomicUsize,
        limit: u64,
        period: f32,
    ) -> Result<Self, ComputeError> {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("vggnet_conv2d_timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = DeviceBuffer::allocate(
            device,
            live,
            "vggnet_conv_timestamp_resolve",
            TIMESTAMP_BYTES,
            limit,
            wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
        )?;
        let readback = DeviceBuffer::allocate(
            device,
            live,
            "vggnet_conv_timestamp_readback",
            TIMESTAMP_BYTES,
            limit,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        )?;
        Ok(Self {
            query_set,
            resolve,
            readback,
            period,
        })
    }

    fn pass_writes(&self) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    fn encode_resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_set, 0..2, self.resolve.buffer(), 0);
        encoder.copy_buffer_to_buffer(
            self.resolve.buffer(),
            0,
            self.readback.buffer(),
            0,
            TIMESTAMP_BYTES,
        );
    }

    /// Reads the mapped timestamps and unmaps the readback buffer.
    fn elapsed(&self) -> Duration {
        let ticks = {
            let data = self.readback.buffer().slice(..).get_mapped_range();
            let begin: u64 = bytemuck::pod_read_unaligned(&data[..8]);
            let end: u64 = bytemuck::pod_read_unaligned(&data[8..16]);
            end.saturating_sub(begin)
        };
        self.readback.buffer().unmap();
        Duration::from_nanos((ticks as f64 * f64::from(self.period)) as u64)
    }
}

fn request_map(buffer: &wgpu::Buffer) -> mpsc::Receiver<Result<(), wgpu::BufferAsyncError>> {
    let (sender, receiver) = mpsc::channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    receiver
}

fn wait_mapped(
    receiver: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
    operation: &'static str,
) -> Result<(), ComputeError> {
    receiver
        .recv()
        .map_err(|_| ComputeError::device(operation, "map callback dropped"))?
        .map_err(|source| ComputeError::Map { operation, source })
}

/// Runs convolutions on the session's device.
///
/// Each call owns its device memory: inputs, filters, biases, outputs, the
/// uniform block, a readback buffer and, on devices that time passes, the
/// timestamp buffers are allocated for the call and destroyed
/// before it returns, on success and on every error path.
#[derive(Debug, Clone)]
pub struct ConvDispatcher {
    session: Arc<DeviceSession>,
}

impl ConvDispatcher {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Upload, dispatch and download one batched convolution.
    ///
    /// Blocks until `output` holds the result.
    pub fn convolve(
        &self,
        request: &ConvRequest<'_>,
        output: &mut [f32],
    ) -> Result<(), ComputeError> {
        request.validate(output.len())?;
        let session = &*self.session;
        let device = session.context.device();
        let queue = session.context.queue();
        let limits = session.context.limits();
        let live = &session.live_buffers;
        let geometry = request.geometry;

        let uniforms = Conv2dUniforms::try_from_geometry(&geometry).ok_or_else(|| {
            ComputeError::Geometry(format!("{geometry:?} does not fit 32-bit indexing"))
        })?;
        let (groups_x, groups_y) = dispatch_grid(&geometry);
        let max_groups = limits.max_compute_workgroups_per_dimension;
        for (axis, requested) in [('x', groups_x), ('y', groups_y)] {
            if requested > u64::from(max_groups) {
                return Err(ComputeError::DispatchTooLarge {
                    axis,
                    requested,
                    limit: max_groups,
                });
            }
        }

        let binding_limit =
            u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        let output_bytes = f32_bytes(output.len());
        let uploaded = f32_bytes(request.input.len() + request.weights.len() + request.biases.len());

        trace!(
            target: "vggnet::gpu",
            "conv D1={} D2={} N={} images={}/{} grid={groups_x}x{groups_y}",
            geometry.in_channels,
            geometry.out_channels,
            geometry.size,
            geometry.active_count,
            geometry.batch_size
        );

        let prepare_start = Instant::now();
        let (outputs, readback, timestamps, _bound, bind_group) =
            scoped(device, "prepare convolution buffers", || {
                let input = DeviceBuffer::upload(
                    device,
                    queue,
                    live,
                    "vggnet_conv_input",
                    request.input,
                    binding_limit,
                )?;
                let filters = DeviceBuffer::upload(
                    device,
                    queue,
                    live,
                    "vggnet_conv_filters",
                    request.weights,
                    binding_limit,
                )?;
                let biases = DeviceBuffer::upload(
                    device,
                    queue,
                    live,
                    "vggnet_conv_biases",
                    request.biases,
                    binding_limit,
                )?;
                let outputs = DeviceBuffer::allocate(
                    device,
                    live,
                    "vggnet_conv_output",
                    output_bytes,
                    binding_limit,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                )?;
                let readback = DeviceBuffer::allocate(
                    device,
                    live,
                    "vggnet_conv_readback",
                    output_bytes,
                    limits.max_buffer_size,
                    wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                )?;
                let uniform = DeviceBuffer::track(
                    create_uniform_buffer(device, "vggnet_conv_uniforms", &uniforms),
                    live,
                );

                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("vggnet_conv2d_bg"),
                    layout: session.conv.bind_group_layout(),
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: input.buffer().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: filters.buffer().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: outputs.buffer().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: biases.buffer().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: uniform.buffer().as_entire_binding(),
                        },
                    ],
                });
                let timestamps = session
                    .timestamp_period
                    .map(|period| PassTimestamps::new(device, live, limits.max_buffer_size, period))
                    .transpose()?;
                Ok((
                    outputs,
                    readback,
                    timestamps,
                    [input, filters, biases, uniform],
                    bind_group,
                ))
            })?;
        let prepare = prepare_start.elapsed();

        let execute_start = Instant::now();
        scoped(device, "dispatch convolution", || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vggnet_conv2d_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("vggnet_conv2d_pass"),
                    timestamp_writes: timestamps.as_ref().map(PassTimestamps::pass_writes),
                });
                pass.set_pipeline(session.conv.pipeline());
                pass.set_bind_group(0, &bind_group, &[]);
                // Both counts were checked against the device limit above.
                pass.dispatch_workgroups(groups_x as u32, groups_y as u32, 1);
            }
            encoder.copy_buffer_to_buffer(outputs.buffer(), 0, readback.buffer(), 0, output_bytes);
            if let Some(timestamps) = timestamps.as_ref() {
                timestamps.encode_resolve(&mut encoder);
            }
            queue.submit(Some(encoder.finish()));
            Ok(())
        })?;

        let output_mapped = request_map(readback.buffer());
        let stamps_mapped = timestamps
            .as_ref()
            .map(|timestamps| request_map(timestamps.readback.buffer()));
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| ComputeError::device("wait for convolution", e))?;
        wait_mapped(output_mapped, "convolution output")?;
        if let Some(receiver) = stamps_mapped {
            wait_mapped(receiver, "convolution pass timestamps")?;
        }
        let execute = execute_start.elapsed();
        let kernel = timestamps
            .as_ref()
            .map_or(Duration::ZERO, PassTimestamps::elapsed);

        let readback_start = Instant::now();
        {
            let data = readback.buffer().slice(..).get_mapped_range();
            output.copy_from_slice(bytemuck::cast_slice(&data));
        }
        readback.buffer().unmap();
        let readback_time = readback_start.elapsed();

        session.counters.record(&DispatchStats {
            calls: 1,
            prepare,
            execute,
            readback: readback_time,
            kernel,
            bytes_uploaded: uploaded,
            bytes_downloaded: output_bytes,
        });
        Ok(())
    }
}

impl ConvolutionBackend for ConvDispatcher {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn convolve(&self, request: &ConvRequest<'_>, output: &mut [f32]) -> Result<(), ComputeError> {
        ConvDispatcher::convolve(self, request, output)
    }
}
