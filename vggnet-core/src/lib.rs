//! Core VGG16 inference primitives.
//!
//! This crate describes the network topology, slices the parameter blob,
//! runs convolutions on the GPU through `wgpu` (or on the host for
//! verification) and drives batches of images through the layer stack.

/// Convolution failure type shared by both backends.
pub mod error;
/// GPU session, call-scoped device buffers and the convolution dispatcher.
pub mod gpu;
/// Convolution, pooling, dense and classification stages.
pub mod layers;
/// Network topology and parameter slicing.
pub mod network;
/// Batched inference orchestration.
pub mod pipeline;
/// Stage and dispatch timing accumulators.
pub mod profile;

pub use error::ComputeError;
pub use gpu::{ConvDispatcher, DeviceSession};
pub use layers::{ConvGeometry, ConvRequest, ConvolutionBackend, HostConvolution, Prediction};
pub use network::{
    CIFAR10_CLASSES, LayerSpec, NetworkArchitecture, NetworkParameters, class_name,
};
pub use pipeline::{InferenceOutput, InferencePipeline};
pub use profile::{DispatchStats, StageTimings};
