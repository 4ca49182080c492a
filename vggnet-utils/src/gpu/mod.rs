//! GPU context management helpers built on top of `wgpu`.
//!
//! Device selection lives here so the inference core only ever sees an opaque,
//! already-resolved [`GpuContext`]. Selection mirrors the classic "platform/device
//! index" workflow: adapters are enumerated, optionally picked by index, and
//! rejected when they are not GPUs unless the caller explicitly allows it.

use std::{fmt, sync::Arc};

use crate::telemetry::telemetry_allows;
use log::{Level, debug, info, warn};
use pollster::block_on;
use serde::Serialize;
use thiserror::Error;
use wgpu::{
    Adapter, AdapterInfo, Backends, Device, DeviceDescriptor, DeviceType, Dx12Compiler,
    ExperimentalFeatures, Features, Instance, InstanceDescriptor, InstanceFlags, Limits,
    MemoryHints, PowerPreference, Queue, RequestAdapterError, RequestAdapterOptions,
    RequestDeviceError, Trace,
};

/// High-level configuration for creating a [`GpuContext`].
#[derive(Clone, Debug)]
pub struct GpuContextOptions {
    /// Whether GPU support is enabled.
    pub enabled: bool,
    /// Allow environment variables (e.g. `WGPU_BACKEND`) to override defaults.
    pub respect_env: bool,
    /// Which backends should be considered.
    pub backends: Backends,
    /// Instance flags (debug/validation toggles).
    pub flags: InstanceFlags,
    /// Adapter preference used when no explicit index is configured.
    pub power_preference: PowerPreference,
    /// Force wgpu to pick its fallback adapter implementation.
    pub force_fallback_adapter: bool,
    /// Pick the adapter at this position of [`list_adapters`] instead of asking for
    /// the preferred one.
    pub adapter_index: Option<usize>,
    /// Accept CPU/software adapters. Off by default: the run is meant for GPUs.
    pub allow_non_gpu: bool,
    /// Features that must be present on the selected adapter.
    pub required_features: Features,
    /// Features enabled only when the adapter offers them.
    pub optional_features: Features,
    /// Limits that must be available. Defaults to the adapter limits.
    pub required_limits: Option<Limits>,
    /// DX12 shader compiler selection for Windows targets.
    pub dx12_shader_compiler: Dx12Compiler,
    /// Optional debug label for the logical device.
    pub label: Option<String>,
    /// Memory allocation hints forwarded to `wgpu`.
    pub memory_hints: Option<MemoryHints>,
}

impl Default for GpuContextOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            respect_env: true,
            backends: Backends::PRIMARY,
            flags: InstanceFlags::from_build_config(),
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            adapter_index: None,
            allow_non_gpu: false,
            required_features: Features::empty(),
            optional_features: Features::TIMESTAMP_QUERY,
            required_limits: None,
            dx12_shader_compiler: Dx12Compiler::default(),
            label: Some("vggnet GPU context".to_string()),
            memory_hints: Some(MemoryHints::Performance),
        }
    }
}

impl GpuContextOptions {
    /// Convenience helper for explicitly disabling GPU usage.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Options used by tests and benches: any adapter, software ones included.
    pub fn permissive() -> Self {
        Self {
            allow_non_gpu: true,
            ..Self::default()
        }
    }

    fn instance(&self) -> (Instance, Backends) {
        let mut instance_desc = if self.respect_env {
            InstanceDescriptor::from_env_or_default()
        } else {
            InstanceDescriptor::default()
        };

        let backends = if self.respect_env {
            self.backends.with_env()
        } else {
            self.backends
        };

        instance_desc.backends = backends;
        instance_desc.flags = if self.respect_env {
            self.flags.with_env()
        } else {
            self.flags
        };
        instance_desc.backend_options.dx12.shader_compiler = self.dx12_shader_compiler.clone();
        (Instance::new(&instance_desc), backends)
    }
}

/// Result of attempting to initialize a GPU context.
#[derive(Debug)]
pub enum GpuAvailability {
    /// GPU resources are ready to use.
    Available(Arc<GpuContext>),
    /// GPU code path has been disabled by configuration.
    Disabled { reason: String },
    /// GPU initialization failed.
    Unavailable { error: GpuInitError },
}

impl GpuAvailability {
    /// Returns `true` when a GPU context was created successfully.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// Returns a reference to the underlying GPU context when it exists.
    pub fn context(&self) -> Option<&Arc<GpuContext>> {
        match self {
            Self::Available(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// Diagnostic snapshot of one adapter, as printed by `--list-adapters`.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterSummary {
    pub index: usize,
    pub name: String,
    pub backend: String,
    pub device_type: String,
    pub driver: String,
    pub is_gpu: bool,
    pub max_invocations_per_workgroup: u32,
    pub max_workgroup_storage_bytes: u32,
    pub max_buffer_bytes: u64,
    pub max_storage_binding_bytes: u64,
}

impl AdapterSummary {
    fn from_adapter(index: usize, adapter: &Adapter) -> Self {
        let info = adapter.get_info();
        let limits = adapter.limits();
        Self {
            index,
            name: info.name.clone(),
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
            driver: format!("{} {}", info.driver, info.driver_info)
                .trim()
                .to_string(),
            is_gpu: is_gpu(info.device_type),
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            max_workgroup_storage_bytes: limits.max_compute_workgroup_storage_size,
            max_buffer_bytes: limits.max_buffer_size,
            max_storage_binding_bytes: u64::from(limits.max_storage_buffer_binding_size),
        }
    }
}

impl fmt::Display for AdapterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "adapter: {}", self.index)?;
        writeln!(f, "- name\t\t\t: {}", self.name)?;
        writeln!(f, "- backend\t\t: {}", self.backend)?;
        writeln!(f, "- device type\t\t: {}", self.device_type)?;
        writeln!(f, "- driver\t\t: {}", self.driver)?;
        writeln!(
            f,
            "- max invocations/group\t: {}",
            self.max_invocations_per_workgroup
        )?;
        writeln!(
            f,
            "- workgroup storage\t: {} bytes",
            self.max_workgroup_storage_bytes
        )?;
        writeln!(f, "- max buffer size\t: {} bytes", self.max_buffer_bytes)?;
        write!(
            f,
            "- max storage binding\t: {} bytes",
            self.max_storage_binding_bytes
        )
    }
}

/// Enumerate every adapter visible to the configured backends.
pub fn list_adapters(options: &GpuContextOptions) -> Vec<AdapterSummary> {
    let (instance, backends) = options.instance();
    instance
        .enumerate_adapters(backends)
        .iter()
        .enumerate()
        .map(|(index, adapter)| AdapterSummary::from_adapter(index, adapter))
        .collect()
}

fn is_gpu(device_type: DeviceType) -> bool {
    matches!(
        device_type,
        DeviceType::DiscreteGpu | DeviceType::IntegratedGpu | DeviceType::VirtualGpu
    )
}

#[derive(Serialize)]
struct GpuSessionTelemetryPayload<'a> {
    event: &'static str,
    adapter_name: &'a str,
    backend: String,
    device_type: String,
    driver: &'a str,
    vendor_id: u32,
    device_id: u32,
}

fn emit_adapter_event(info: &AdapterInfo) {
    use log::log;

    if !telemetry_allows(Level::Info) {
        return;
    }

    let payload = GpuSessionTelemetryPayload {
        event: "gpu_adapter",
        adapter_name: &info.name,
        backend: format!("{:?}", info.backend),
        device_type: format!("{:?}", info.device_type),
        driver: &info.driver,
        vendor_id: info.vendor,
        device_id: info.device,
    };

    match serde_json::to_string(&payload) {
        Ok(json) => {
            log!(target: "vggnet::telemetry", Level::Info, "{json}");
        }
        Err(err) => {
            warn!(
                target: "vggnet::telemetry",
                "failed to serialize GPU telemetry payload: {err}"
            );
        }
    }
}

/// Shared GPU device/queue wrapper with a little bit of metadata.
#[derive(Debug)]
pub struct GpuContext {
    device: Device,
    queue: Queue,
    info: AdapterInfo,
    features: Features,
    limits: Limits,
}

impl GpuContext {
    /// Initialize a new GPU context with the provided options.
    pub fn initialize(options: &GpuContextOptions) -> Result<Self, GpuInitError> {
        if !options.enabled {
            return Err(GpuInitError::Disabled);
        }

        let (instance, backends) = options.instance();
        let adapter = match options.adapter_index {
            Some(index) => {
                let mut adapters = instance.enumerate_adapters(backends);
                let available = adapters.len();
                if index >= available {
                    return Err(GpuInitError::NoAdapterAtIndex { index, available });
                }
                adapters.swap_remove(index)
            }
            None => block_on(instance.request_adapter(&RequestAdapterOptions {
                power_preference: options.power_preference,
                force_fallback_adapter: options.force_fallback_adapter,
                compatible_surface: None,
            }))
            .map_err(|source| GpuInitError::Adapter { backends, source })?,
        };

        let info = adapter.get_info();
        if !options.allow_non_gpu && !is_gpu(info.device_type) {
            return Err(GpuInitError::NotAGpu {
                name: info.name,
                device_type: info.device_type,
            });
        }

        let supported_features = adapter.features();
        if !supported_features.contains(options.required_features) {
            return Err(GpuInitError::MissingFeatures {
                requested: options.required_features,
                supported: supported_features,
            });
        }
        let features =
            options.required_features | (options.optional_features & supported_features);

        let limits = options
            .required_limits
            .clone()
            .unwrap_or_else(|| adapter.limits());

        let device_desc = DeviceDescriptor {
            label: options.label.as_deref(),
            required_features: features,
            required_limits: limits.clone(),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: options.memory_hints.clone().unwrap_or_default(),
            trace: Trace::default(),
        };

        let (device, queue) =
            block_on(adapter.request_device(&device_desc)).map_err(GpuInitError::from)?;

        info!(
            target: "vggnet::gpu",
            "Using GPU adapter '{}' ({:?}/{:?})",
            info.name, info.backend, info.device_type
        );
        debug!(
            target: "vggnet::gpu",
            "Negotiated limits: workgroup storage {} bytes, max buffer {} bytes",
            limits.max_compute_workgroup_storage_size, limits.max_buffer_size
        );
        emit_adapter_event(&info);

        Ok(Self {
            device,
            queue,
            info,
            features,
            limits,
        })
    }

    /// Attempt to create a GPU context, reporting why it is unavailable otherwise.
    pub fn init_with_fallback(options: &GpuContextOptions) -> GpuAvailability {
        if !options.enabled {
            return GpuAvailability::Disabled {
                reason: "GPU acceleration disabled via configuration".to_string(),
            };
        }

        match Self::initialize(options) {
            Ok(ctx) => GpuAvailability::Available(Arc::new(ctx)),
            Err(GpuInitError::Disabled) => GpuAvailability::Disabled {
                reason: "GPU acceleration disabled via configuration".to_string(),
            },
            Err(err) => {
                warn!(target: "vggnet::gpu", "GPU initialization failed ({err}).");
                GpuAvailability::Unavailable { error: err }
            }
        }
    }

    /// Returns the shared `wgpu::Device`.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns the shared `wgpu::Queue`.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Adapter metadata handy for logging.
    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.info
    }

    /// `wgpu::Features` enabled on this context.
    pub fn features(&self) -> Features {
        self.features
    }

    /// `wgpu::Limits` negotiated for this context.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

/// Tracks GPU initialization failures.
#[derive(Debug, Error)]
pub enum GpuInitError {
    #[error("GPU adapter request failed for {backends:?}: {source}")]
    Adapter {
        backends: Backends,
        #[source]
        source: RequestAdapterError,
    },
    #[error("no adapter at index {index} ({available} available)")]
    NoAdapterAtIndex { index: usize, available: usize },
    #[error("selected device '{name}' is not a GPU ({device_type:?})")]
    NotAGpu {
        name: String,
        device_type: DeviceType,
    },
    #[error(
        "GPU adapter missing required features (requested={requested:?}, supported={supported:?})"
    )]
    MissingFeatures {
        requested: Features,
        supported: Features,
    },
    #[error("GPU device creation failed: {0}")]
    Device(#[from] RequestDeviceError),
    #[error("GPU acceleration disabled")]
    Disabled,
}
