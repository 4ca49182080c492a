//! Persisted run configuration shared by the CLI and the benches.
//!
//! Every section is `#[serde(default)]`, so a settings file only has to name
//! the values it changes.

use crate::{dataset, gpu::GpuContextOptions};

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Where the raw input files live and how many images to classify.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DataSettings {
    pub images: PathBuf,
    pub labels: PathBuf,
    pub network: PathBuf,
    pub num_images: usize,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            images: PathBuf::from(dataset::DEFAULT_IMAGES_FILE),
            labels: PathBuf::from(dataset::DEFAULT_LABELS_FILE),
            network: PathBuf::from(dataset::DEFAULT_NETWORK_FILE),
            num_images: 10_000,
        }
    }
}

/// Which implementation executes the convolution layers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Offload convolutions to the GPU (default).
    #[default]
    Gpu,
    /// Run the reference convolution on the host. Slow; meant for verification.
    Host,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Gpu => "gpu",
            BackendKind::Host => "host",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(BackendKind::Gpu),
            "host" | "cpu" => Ok(BackendKind::Host),
            other => Err(format!(
                "invalid backend '{other}'; expected 'gpu' or 'host'"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceSettings {
    /// Images per batch; the last batch may be shorter.
    pub batch_size: usize,
    pub backend: BackendKind,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            batch_size: 256,
            backend: BackendKind::Gpu,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether stage timings are logged.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }
}

/// GPU device selection preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    pub enabled: bool,
    /// Respect `WGPU_*` environment overrides when initializing the backend.
    pub respect_env: bool,
    /// Adapter index as printed by `--list-adapters`; `None` picks the high-performance one.
    pub adapter_index: Option<usize>,
    /// Accept software/CPU adapters.
    pub allow_non_gpu: bool,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            respect_env: true,
            adapter_index: None,
            allow_non_gpu: false,
        }
    }
}

impl From<&GpuSettings> for GpuContextOptions {
    fn from(settings: &GpuSettings) -> Self {
        GpuContextOptions {
            enabled: settings.enabled,
            respect_env: settings.respect_env,
            adapter_index: settings.adapter_index,
            allow_non_gpu: settings.allow_non_gpu,
            ..Default::default()
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub data: DataSettings,
    pub inference: InferenceSettings,
    pub gpu: GpuSettings,
    pub telemetry: TelemetrySettings,
}

impl AppSettings {
    /// Load settings from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting `path`.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Reject settings no run can use.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.inference.batch_size > 0,
            "batch_size must be greater than zero"
        );
        anyhow::ensure!(
            self.data.num_images > 0,
            "num_images must be greater than zero"
        );
        Ok(())
    }
}

/// Returns the default settings location (`config/vggnet.json`).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/vggnet.json"))
        .unwrap_or_else(|_| PathBuf::from("config/vggnet.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let settings = AppSettings::default();
        settings.save_to_path(file.path()).expect("save");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.data, settings.data);
        assert_eq!(loaded.inference, settings.inference);
        assert_eq!(loaded.gpu.adapter_index, None);
        assert_eq!(loaded.telemetry.level, settings.telemetry.level);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "inference": { "batch_size": 64, "backend": "host" },
            "gpu": { "adapter_index": 1 }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.inference.batch_size, 64);
        assert_eq!(loaded.inference.backend, BackendKind::Host);
        assert_eq!(loaded.gpu.adapter_index, Some(1));
        assert!(loaded.gpu.enabled);
        assert_eq!(loaded.data, DataSettings::default());
        assert_eq!(loaded.telemetry.level_filter(), LevelFilter::Info);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(file.path(), r#"{ "inference": { "batch_size": 0 } }"#).expect("write");
        assert!(AppSettings::load_from_path(file.path()).is_err());
    }

    #[test]
    fn backend_parses_aliases() {
        assert_eq!("GPU".parse::<BackendKind>(), Ok(BackendKind::Gpu));
        assert_eq!(" cpu ".parse::<BackendKind>(), Ok(BackendKind::Host));
        assert!("tpu".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Host.to_string(), "host");
    }

    #[test]
    fn gpu_settings_map_to_context_options() {
        let settings = GpuSettings {
            adapter_index: Some(2),
            allow_non_gpu: true,
            ..GpuSettings::default()
        };
        let options = GpuContextOptions::from(&settings);
        assert_eq!(options.adapter_index, Some(2));
        assert!(options.allow_non_gpu);
        assert!(options.enabled);
    }
}
