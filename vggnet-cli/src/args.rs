//! Command-line argument definitions for vggnet-cli.

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use vggnet_utils::BackendKind;

/// Classify CIFAR-10 images with VGG16, offloading convolutions to the GPU.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct InferArgs {
    /// Number of images to classify (defaults to the settings file, then 10000).
    #[arg(value_name = "NUM_IMAGES")]
    pub num_images: Option<usize>,

    /// Report file receiving one line per image and the accuracy.
    #[arg(value_name = "OUTPUT", default_value = "result.out")]
    pub output: PathBuf,

    /// Raw image file (`num_images x 3 x 32 x 32` little-endian f32).
    #[arg(long)]
    pub images: Option<PathBuf>,

    /// Raw label file (one little-endian i32 per image).
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Raw parameter blob of the whole network.
    #[arg(long)]
    pub network: Option<PathBuf>,

    /// Images per batch; the last batch may be shorter.
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Where convolutions run (`gpu` or `host`).
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Optional settings JSON. Defaults to `config/vggnet.json` when present, otherwise built-in values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,

    /// Disable the GPU entirely and run convolutions on the host.
    #[arg(long = "no-gpu", action = ArgAction::SetTrue)]
    pub no_gpu: bool,

    /// Use the adapter at this index of `--list-adapters`.
    #[arg(long, value_name = "INDEX")]
    pub adapter_index: Option<usize>,

    /// Accept software or CPU adapters.
    #[arg(long, action = ArgAction::SetTrue)]
    pub allow_non_gpu: bool,

    /// Control whether `WGPU_*` env vars influence GPU selection (`auto` or `ignore`).
    #[arg(long = "gpu-env", value_enum)]
    pub gpu_env: Option<GpuEnvMode>,

    /// Print the visible adapters and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub list_adapters: bool,

    /// Compare the written report against a reference report; labels must match.
    #[arg(long, value_name = "REFERENCE")]
    pub compare: Option<PathBuf>,

    /// Also write the predictions to a JSON file.
    #[arg(long)]
    pub json: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum BackendArg {
    Gpu,
    /// Reference convolution on the calling thread.
    Host,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Gpu => BackendKind::Gpu,
            BackendArg::Host => BackendKind::Host,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum GpuEnvMode {
    /// Respect environment overrides such as `WGPU_BACKEND`.
    Auto,
    /// Ignore environment overrides and rely solely on CLI/config.
    Ignore,
}

impl GpuEnvMode {
    pub fn respects_env(self) -> bool {
        matches!(self, GpuEnvMode::Auto)
    }
}
