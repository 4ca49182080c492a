use super::{
    conv2d::{CONV_WORKGROUP_Y, Conv2dPipeline, FILTER_CACHE_BYTES},
    utils::scoped,
};
use crate::profile::DispatchStats;

use anyhow::{Context, Result};
use log::info;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use vggnet_utils::gpu::{GpuContext, GpuContextOptions};

/// Process-wide GPU state: the device, its queue and the compiled convolution
/// kernel.
///
/// Read-only after construction apart from diagnostic counters, which are
/// atomics, so a session can be shared behind an [`Arc`].
pub struct DeviceSession {
    pub(super) context: Arc<GpuContext>,
    pub(super) conv: Conv2dPipeline,
    pub(super) live_buffers: AtomicUsize,
    pub(super) counters: DispatchCounters,
    /// Nanoseconds per timestamp tick when the device can time compute passes.
    pub(super) timestamp_period: Option<f32>,
}

#[derive(Debug, Default)]
pub(super) struct DispatchCounters {
    calls: AtomicU64,
    prepare_nanos: AtomicU64,
    execute_nanos: AtomicU64,
    readback_nanos: AtomicU64,
    kernel_nanos: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl DispatchCounters {
    pub(super) fn record(&self, sample: &DispatchStats) {
        self.calls.fetch_add(sample.calls, Ordering::Relaxed);
        self.prepare_nanos
            .fetch_add(sample.prepare.as_nanos() as u64, Ordering::Relaxed);
        self.execute_nanos
            .fetch_add(sample.execute.as_nanos() as u64, Ordering::Relaxed);
        self.readback_nanos
            .fetch_add(sample.readback.as_nanos() as u64, Ordering::Relaxed);
        self.kernel_nanos
            .fetch_add(sample.kernel.as_nanos() as u64, Ordering::Relaxed);
        self.bytes_uploaded
            .fetch_add(sample.bytes_uploaded, Ordering::Relaxed);
        self.bytes_downloaded
            .fetch_add(sample.bytes_downloaded, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            calls: self.calls.load(Ordering::Relaxed),
            prepare: Duration::from_nanos(self.prepare_nanos.load(Ordering::Relaxed)),
            execute: Duration::from_nanos(self.execute_nanos.load(Ordering::Relaxed)),
            readback: Duration::from_nanos(self.readback_nanos.load(Ordering::Relaxed)),
            kernel: Duration::from_nanos(self.kernel_nanos.load(Ordering::Relaxed)),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

impl DeviceSession {
    /// Select an adapter, create the device and compile the convolution kernel.
    pub fn initialize(options: &GpuContextOptions) -> Result<Self> {
        let context =
            GpuContext::initialize(options).context("failed to initialize the GPU device")?;
        Self::from_context(Arc::new(context))
    }

    /// Build a session around an already initialized context.
    pub fn from_context(context: Arc<GpuContext>) -> Result<Self> {
        check_limits(context.limits())?;
        let device = context.device();
        let conv = scoped(device, "compile convolution kernel", || {
            Ok(Conv2dPipeline::new(device))
        })?;

        let timestamp_period = context
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY)
            .then(|| context.queue().get_timestamp_period());

        let adapter = context.adapter_info();
        info!(
            target: "vggnet::gpu",
            "Convolution kernel ready on '{}' ({:?}, pass timestamps {})",
            adapter.name,
            adapter.backend,
            if timestamp_period.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            context,
            conv,
            live_buffers: AtomicUsize::new(0),
            counters: DispatchCounters::default(),
            timestamp_period,
        })
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Device buffers currently allocated by dispatches. Zero whenever no
    /// convolution is in flight.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    /// Whether dispatches record device-side kernel time.
    pub fn times_kernels(&self) -> bool {
        self.timestamp_period.is_some()
    }

    /// Cumulative dispatch counters since the session was created.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("adapter", &self.context.adapter_info().name)
            .field("live_buffers", &self.live_buffers())
            .finish()
    }
}

fn check_limits(limits: &wgpu::Limits) -> Result<()> {
    anyhow::ensure!(
        limits.max_compute_workgroup_size_y >= CONV_WORKGROUP_Y
            && limits.max_compute_invocations_per_workgroup >= CONV_WORKGROUP_Y,
        "device supports {} invocations per workgroup (y extent {}), convolution needs {CONV_WORKGROUP_Y}",
        limits.max_compute_invocations_per_workgroup,
        limits.max_compute_workgroup_size_y
    );
    anyhow::ensure!(
        limits.max_compute_workgroup_storage_size >= FILTER_CACHE_BYTES,
        "device offers {} bytes of workgroup storage, convolution needs {FILTER_CACHE_BYTES}",
        limits.max_compute_workgroup_storage_size
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_fit_the_kernel() {
        check_limits(&wgpu::Limits::default()).expect("default limits");
        check_limits(&wgpu::Limits::downlevel_defaults()).expect("downlevel limits");
    }

    #[test]
    fn small_workgroup_storage_is_rejected() {
        let limits = wgpu::Limits {
            max_compute_workgroup_storage_size: 4096,
            ..wgpu::Limits::default()
        };
        let err = check_limits(&limits).unwrap_err();
        assert!(err.to_string().contains("workgroup storage"));
    }
}
