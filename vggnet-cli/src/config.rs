//! Configuration loading and CLI override logic.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;
use vggnet_utils::{
    BackendKind,
    config::{AppSettings, default_settings_path},
    normalize_path,
};

use crate::args::InferArgs;

/// Load application settings from a file or use defaults.
pub fn load_settings(config_path: Option<&PathBuf>) -> Result<AppSettings> {
    if let Some(path) = config_path {
        let resolved = normalize_path(path)?;
        let settings = AppSettings::load_from_path(&resolved)?;
        info!("Loaded settings from {}", resolved.display());
        Ok(settings)
    } else {
        let default_path = default_settings_path();
        if default_path.exists() {
            let settings = AppSettings::load_from_path(&default_path).with_context(|| {
                format!(
                    "failed to load default settings from {}",
                    default_path.display()
                )
            })?;
            info!("Loaded settings from {}", default_path.display());
            Ok(settings)
        } else {
            Ok(AppSettings::default())
        }
    }
}

/// Apply command-line arguments to override loaded or default settings.
pub fn apply_cli_overrides(settings: &mut AppSettings, args: &InferArgs) {
    if let Some(path) = args.images.as_ref() {
        settings.data.images = path.clone();
    }
    if let Some(path) = args.labels.as_ref() {
        settings.data.labels = path.clone();
    }
    if let Some(path) = args.network.as_ref() {
        settings.data.network = path.clone();
    }
    if let Some(count) = args.num_images {
        settings.data.num_images = count;
    }

    if let Some(batch_size) = args.batch_size {
        settings.inference.batch_size = batch_size;
    }
    if let Some(backend) = args.backend {
        settings.inference.backend = backend.into();
    }

    if args.no_gpu {
        settings.gpu.enabled = false;
        settings.inference.backend = BackendKind::Host;
    }
    if let Some(index) = args.adapter_index {
        settings.gpu.adapter_index = Some(index);
    }
    if args.allow_non_gpu {
        settings.gpu.allow_non_gpu = true;
    }
    if let Some(mode) = args.gpu_env {
        settings.gpu.respect_env = mode.respects_env();
    }

    if args.telemetry {
        settings.telemetry.enabled = true;
    }
    if let Some(level) = args.telemetry_level.as_ref() {
        let normalized = level.trim();
        if !normalized.is_empty() {
            let lower = normalized.to_ascii_lowercase();
            settings.telemetry.level = lower.clone();
            if lower == "off" {
                settings.telemetry.enabled = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    fn parse(argv: &[&str]) -> InferArgs {
        InferArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn overrides_replace_data_and_inference_settings() {
        let mut settings = AppSettings::default();
        let args = parse(&[
            "vggnet-cli",
            "42",
            "--images",
            "a.bin",
            "--network",
            "n.bin",
            "--batch-size",
            "8",
            "--backend",
            "host",
        ]);
        apply_cli_overrides(&mut settings, &args);

        assert_eq!(settings.data.num_images, 42);
        assert_eq!(settings.data.images, Path::new("a.bin"));
        assert_eq!(settings.data.network, Path::new("n.bin"));
        assert_eq!(settings.inference.batch_size, 8);
        assert_eq!(settings.inference.backend, BackendKind::Host);
        assert!(settings.gpu.enabled);
    }

    #[test]
    fn no_gpu_selects_the_host_backend() {
        let mut settings = AppSettings::default();
        apply_cli_overrides(&mut settings, &parse(&["vggnet-cli", "--no-gpu"]));
        assert!(!settings.gpu.enabled);
        assert_eq!(settings.inference.backend, BackendKind::Host);
    }

    #[test]
    fn telemetry_level_off_disables_telemetry() {
        let mut settings = AppSettings::default();
        settings.telemetry.enabled = true;
        apply_cli_overrides(
            &mut settings,
            &parse(&["vggnet-cli", "--telemetry-level", " OFF "]),
        );
        assert!(!settings.telemetry.enabled);
        assert_eq!(settings.telemetry.level, "off");
    }

    #[test]
    fn untouched_flags_keep_loaded_values() {
        let mut settings = AppSettings::default();
        settings.inference.batch_size = 64;
        settings.gpu.adapter_index = Some(1);
        apply_cli_overrides(&mut settings, &parse(&["vggnet-cli", "--gpu-env", "ignore"]));
        assert_eq!(settings.inference.batch_size, 64);
        assert_eq!(settings.gpu.adapter_index, Some(1));
        assert!(!settings.gpu.respect_env);
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vggnet.json");
        std::fs::write(&path, r#"{ "inference": { "batch_size": 16 } }"#).unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.inference.batch_size, 16);
        assert_eq!(settings.data.num_images, 10_000);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let missing = PathBuf::from("definitely/not/here.json");
        assert!(load_settings(Some(&missing)).is_err());
    }
}
