//! Batched forward pass over the layer list of a [`NetworkArchitecture`].

use crate::{
    layers::{ConvGeometry, ConvRequest, ConvolutionBackend, Prediction, classify, dense_forward, max_pool_2x2},
    network::{ActivationShape, LayerSpec, NetworkArchitecture, NetworkParameters, class_name},
    profile::StageTimings,
};

use anyhow::{Context, Result};
use log::{Level, debug, trace};
use std::{mem, time::Instant};
use vggnet_utils::telemetry::{stage_timer, timing_guard};

/// Drives batches of images through the network.
///
/// Convolutions go to the configured [`ConvolutionBackend`]; pooling, dense
/// layers and the classification head run on the calling thread.
#[derive(Debug)]
pub struct InferencePipeline {
    architecture: NetworkArchitecture,
    parameters: NetworkParameters,
    backend: Box<dyn ConvolutionBackend>,
    batch_size: usize,
}

/// Predictions for every image of a run, in input order.
#[derive(Debug, Clone, Default)]
pub struct InferenceOutput {
    pub labels: Vec<usize>,
    pub confidences: Vec<f32>,
    pub timings: StageTimings,
}

impl InferenceOutput {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn predictions(&self) -> impl Iterator<Item = Prediction> + '_ {
        self.labels
            .iter()
            .zip(&self.confidences)
            .map(|(&label, &confidence)| Prediction { label, confidence })
    }

    /// Fraction of predictions that match `truth`; zero for an empty run.
    pub fn accuracy(&self, truth: &[usize]) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        let correct = self
            .labels
            .iter()
            .zip(truth)
            .filter(|(predicted, expected)| predicted == expected)
            .count();
        correct as f64 / self.labels.len() as f64
    }
}

impl InferencePipeline {
    pub fn new(
        architecture: NetworkArchitecture,
        parameters: NetworkParameters,
        backend: Box<dyn ConvolutionBackend>,
        batch_size: usize,
    ) -> Result<Self> {
        architecture
            .validate()
            .context("invalid network architecture")?;
        anyhow::ensure!(batch_size > 0, "batch size must be greater than zero");
        let learned = architecture.parameter_layout().len();
        anyhow::ensure!(
            parameters.len() == learned,
            "parameters describe {} learned layers, the architecture has {learned}",
            parameters.len()
        );
        anyhow::ensure!(
            parameters.fits(&architecture),
            "parameter slices do not match the layer shapes of the architecture"
        );
        Ok(Self {
            architecture,
            parameters,
            backend,
            batch_size,
        })
    }

    pub fn architecture(&self) -> &NetworkArchitecture {
        &self.architecture
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Name of the convolution backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Classify every image in `images`, writing the label and confidence of
    /// image `i` to `labels[i]` and `confidences[i]`.
    ///
    /// `images` holds whole input tensors back to back. The last batch may be
    /// shorter than the batch size. Stops at the first failing layer.
    pub fn run(
        &self,
        images: &[f32],
        labels: &mut [usize],
        confidences: &mut [f32],
    ) -> Result<StageTimings> {
        let _guard = timing_guard("vggnet_core::pipeline::run", Level::Debug);
        let image_len = self.architecture.input_len();
        anyhow::ensure!(
            images.len().is_multiple_of(image_len),
            "image buffer of {} floats is not a whole number of {image_len}-float images",
            images.len()
        );
        let num_images = images.len() / image_len;
        anyhow::ensure!(
            labels.len() == num_images && confidences.len() == num_images,
            "{num_images} images need as many labels and confidences (got {} and {})",
            labels.len(),
            confidences.len()
        );

        let mut timings = StageTimings::default();
        if num_images == 0 {
            return Ok(timings);
        }

        let capacity = self.architecture.max_activation_len()? * self.batch_size;
        let mut current = vec![0.0f32; capacity];
        let mut next = vec![0.0f32; capacity];

        for (batch_index, batch) in images.chunks(self.batch_size * image_len).enumerate() {
            let first = batch_index * self.batch_size;
            let active = batch.len() / image_len;
            debug!(
                "batch {batch_index}: images {first}..{} on {}",
                first + active,
                self.backend.name()
            );

            current[..batch.len()].copy_from_slice(batch);
            let shape = self.forward_batch(&mut current, &mut next, active, &mut timings)?;

            let classes = shape.elements();
            let classify_timer = stage_timer("classify", Level::Trace, &mut timings.classification);
            for (offset, logits) in current[..classes * active]
                .chunks_exact_mut(classes)
                .enumerate()
            {
                let index = first + offset;
                let prediction = classify(logits);
                labels[index] = prediction.label;
                confidences[index] = prediction.confidence;
                trace!(
                    "Image {index:04}/{:04}: {} {:.6}",
                    num_images - 1,
                    class_name(prediction.label),
                    prediction.confidence
                );
            }
            drop(classify_timer);
            timings.batches += 1;
            timings.images += active;
        }

        Ok(timings)
    }

    /// Allocate the prediction arrays and [`run`](Self::run) every image.
    pub fn classify_all(&self, images: &[f32]) -> Result<InferenceOutput> {
        let count = images.len() / self.architecture.input_len();
        let mut labels = vec![0; count];
        let mut confidences = vec![0.0; count];
        let timings = self.run(images, &mut labels, &mut confidences)?;
        Ok(InferenceOutput {
            labels,
            confidences,
            timings,
        })
    }

    /// Run every layer over the `active` images at the front of `current`.
    /// Returns the per-image shape of the result, which is left in `current`.
    fn forward_batch(
        &self,
        current: &mut Vec<f32>,
        next: &mut Vec<f32>,
        active: usize,
        timings: &mut StageTimings,
    ) -> Result<ActivationShape> {
        let mut shape = self.architecture.input_shape();
        let mut learned = 0;
        let mut block = 0;

        for layer in &self.architecture.layers {
            let input = &current[..shape.elements() * active];
            match *layer {
                LayerSpec::Conv {
                    in_channels,
                    out_channels,
                } => {
                    let params = self
                        .parameters
                        .layer(learned)
                        .with_context(|| format!("missing parameters for layer {learned}"))?;
                    let geometry = ConvGeometry {
                        in_channels,
                        out_channels,
                        size: shape.size,
                        batch_size: self.batch_size,
                        active_count: active,
                    };
                    let request = ConvRequest {
                        input,
                        weights: params.weights,
                        biases: params.biases,
                        geometry,
                    };
                    let started = Instant::now();
                    self.backend
                        .convolve(&request, &mut next[..geometry.output_len()])
                        .with_context(|| {
                            format!(
                                "convolution {in_channels}->{out_channels} at {0}x{0} failed",
                                shape.size
                            )
                        })?;
                    timings.record_conv(block, started.elapsed());
                    learned += 1;
                    shape = ActivationShape {
                        channels: out_channels,
                        size: shape.size,
                    };
                }
                LayerSpec::MaxPool => {
                    let pooled = ActivationShape {
                        channels: shape.channels,
                        size: shape.size / 2,
                    };
                    let _timer = stage_timer("max_pool", Level::Trace, &mut timings.pooling);
                    for (src, dst) in input
                        .chunks_exact(shape.elements())
                        .zip(next.chunks_exact_mut(pooled.elements()))
                    {
                        max_pool_2x2(src, dst, shape.channels, pooled.size);
                    }
                    shape = pooled;
                    block += 1;
                }
                LayerSpec::Dense { inputs, outputs } => {
                    let params = self
                        .parameters
                        .layer(learned)
                        .with_context(|| format!("missing parameters for layer {learned}"))?;
                    let _timer = stage_timer("dense", Level::Trace, &mut timings.dense);
                    for (src, dst) in input
                        .chunks_exact(inputs)
                        .zip(next.chunks_exact_mut(outputs))
                    {
                        dense_forward(src, params.weights, params.biases, dst);
                    }
                    learned += 1;
                    shape = ActivationShape {
                        channels: outputs,
                        size: 1,
                    };
                }
            }
            mem::swap(current, next);
        }
        Ok(shape)
    }
}
