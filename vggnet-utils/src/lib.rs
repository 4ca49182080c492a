//! Common helpers shared across vggnet crates.

/// Run configuration and settings management.
pub mod config;
/// Raw CIFAR-10 image, label and parameter readers.
pub mod dataset;
/// Shared GPU context initialization and adapter diagnostics.
pub mod gpu;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::LevelFilter;

pub use config::{AppSettings, BackendKind};
pub use dataset::{DatasetError, read_bytes, read_images, read_labels, read_network};
pub use gpu::{
    AdapterSummary, GpuAvailability, GpuContext, GpuContextOptions, GpuInitError, list_adapters,
};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, stage_timer, telemetry_enabled, timing_guard,
};

/// Initialize logging once.
///
/// Respects `RUST_LOG` when it is set and otherwise falls back to
/// `default_filter`. Telemetry output is always let through; whether it is
/// produced is decided by [`telemetry::configure`].
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(telemetry::TELEMETRY_TARGET, LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}

/// Validate that a path exists and resolve it to an absolute path.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    anyhow::ensure!(path.exists(), "path does not exist: {}", path.display());
    Ok(path.canonicalize()?)
}
