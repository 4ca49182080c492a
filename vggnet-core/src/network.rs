//! Network topology and the parameter blob sliced against it.
//!
//! The topology is plain data: an ordered list of [`LayerSpec`]s that the
//! inference pipeline walks. Learned layers (convolutions and dense layers)
//! each own one `(weights, bias)` pair in the parameter blob, stored in layer
//! order with the weights first.

use std::ops::Range;

use anyhow::{Context, Result};

/// CIFAR-10 class names, indexed by label.
pub const CIFAR10_CLASSES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// Name of the class behind `label`, or `"unknown"` outside 0..10.
pub fn class_name(label: usize) -> &'static str {
    CIFAR10_CLASSES.get(label).copied().unwrap_or("unknown")
}

/// Spatial extent of a convolution filter.
pub const KERNEL_AREA: usize = 9;

/// One stage of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSpec {
    /// 3x3 convolution, stride 1, zero padding 1, fused bias + ReLU.
    Conv {
        in_channels: usize,
        out_channels: usize,
    },
    /// 2x2 max pooling, stride 2.
    MaxPool,
    /// Fully connected layer with fused bias + ReLU.
    Dense { inputs: usize, outputs: usize },
}

impl LayerSpec {
    /// `(weights, bias)` element counts, `None` for layers without parameters.
    pub fn parameter_shape(&self) -> Option<(usize, usize)> {
        match *self {
            LayerSpec::Conv {
                in_channels,
                out_channels,
            } => Some((out_channels * in_channels * KERNEL_AREA, out_channels)),
            LayerSpec::Dense { inputs, outputs } => Some((outputs * inputs, outputs)),
            LayerSpec::MaxPool => None,
        }
    }
}

/// `(channels, size, size)` activation shape of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationShape {
    pub channels: usize,
    pub size: usize,
}

impl ActivationShape {
    pub fn elements(&self) -> usize {
        self.channels * self.size * self.size
    }
}

/// Where one learned layer's weights and bias live inside the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSlice {
    pub weights: Range<usize>,
    pub bias: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkArchitecture {
    pub input_channels: usize,
    pub input_size: usize,
    pub classes: usize,
    pub layers: Vec<LayerSpec>,
}

impl NetworkArchitecture {
    /// VGG16 adapted to 32x32 CIFAR-10 inputs: 13 convolutions in five blocks,
    /// a pool after each block and three 512-wide dense layers.
    pub fn vgg16_cifar10() -> Self {
        use LayerSpec::{Conv, Dense, MaxPool};

        let conv = |in_channels, out_channels| Conv {
            in_channels,
            out_channels,
        };
        Self {
            input_channels: 3,
            input_size: 32,
            classes: 10,
            layers: vec![
                conv(3, 64),
                conv(64, 64),
                MaxPool,
                conv(64, 128),
                conv(128, 128),
                MaxPool,
                conv(128, 256),
                conv(256, 256),
                conv(256, 256),
                MaxPool,
                conv(256, 512),
                conv(512, 512),
                conv(512, 512),
                MaxPool,
                conv(512, 512),
                conv(512, 512),
                conv(512, 512),
                MaxPool,
                Dense {
                    inputs: 512,
                    outputs: 512,
                },
                Dense {
                    inputs: 512,
                    outputs: 512,
                },
                Dense {
                    inputs: 512,
                    outputs: 10,
                },
            ],
        }
    }

    pub fn input_shape(&self) -> ActivationShape {
        ActivationShape {
            channels: self.input_channels,
            size: self.input_size,
        }
    }

    /// Floats per input image.
    pub fn input_len(&self) -> usize {
        self.input_shape().elements()
    }

    /// Check that consecutive layers agree on shapes and that the stack ends in
    /// `classes` logits.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.input_channels > 0 && self.input_size > 0,
            "input shape must be non-empty"
        );
        anyhow::ensure!(self.classes > 0, "classes must be greater than zero");
        anyhow::ensure!(
            matches!(self.layers.last(), Some(LayerSpec::Dense { .. })),
            "the network must end with a dense layer"
        );

        let mut shape = self.input_shape();
        for (index, layer) in self.layers.iter().enumerate() {
            shape = next_shape(shape, layer).with_context(|| format!("layer {index}"))?;
        }
        anyhow::ensure!(
            shape.channels == self.classes,
            "final layer produces {} outputs but {} classes are configured",
            shape.channels,
            self.classes
        );
        Ok(())
    }

    /// Activation shape after every layer, in layer order.
    pub fn shapes(&self) -> Result<Vec<ActivationShape>> {
        let mut shape = self.input_shape();
        self.layers
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                shape = next_shape(shape, layer).with_context(|| format!("layer {index}"))?;
                Ok(shape)
            })
            .collect()
    }

    /// Largest per-image activation, input included.
    pub fn max_activation_len(&self) -> Result<usize> {
        Ok(self
            .shapes()?
            .iter()
            .map(ActivationShape::elements)
            .fold(self.input_len(), usize::max))
    }

    /// Offsets of every learned layer's parameters in blob order.
    pub fn parameter_layout(&self) -> Vec<ParameterSlice> {
        let mut offset = 0;
        self.layers
            .iter()
            .filter_map(LayerSpec::parameter_shape)
            .map(|(weights, bias)| {
                let slice = ParameterSlice {
                    weights: offset..offset + weights,
                    bias: offset + weights..offset + weights + bias,
                };
                offset += weights + bias;
                slice
            })
            .collect()
    }

    /// Total floats expected in the parameter blob.
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .filter_map(LayerSpec::parameter_shape)
            .map(|(weights, bias)| weights + bias)
            .sum()
    }
}

fn next_shape(shape: ActivationShape, layer: &LayerSpec) -> Result<ActivationShape> {
    match *layer {
        LayerSpec::Conv {
            in_channels,
            out_channels,
        } => {
            anyhow::ensure!(
                in_channels == shape.channels,
                "convolution expects {in_channels} channels, got {}",
                shape.channels
            );
            anyhow::ensure!(out_channels > 0, "convolution must produce channels");
            Ok(ActivationShape {
                channels: out_channels,
                size: shape.size,
            })
        }
        LayerSpec::MaxPool => {
            anyhow::ensure!(
                shape.size >= 2 && shape.size.is_multiple_of(2),
                "max pooling needs an even spatial size, got {}",
                shape.size
            );
            Ok(ActivationShape {
                channels: shape.channels,
                size: shape.size / 2,
            })
        }
        LayerSpec::Dense { inputs, outputs } => {
            anyhow::ensure!(
                shape.size == 1,
                "dense layers only run on 1x1 activations, got {0}x{0}",
                shape.size
            );
            anyhow::ensure!(
                inputs == shape.channels,
                "dense layer expects {inputs} inputs, got {}",
                shape.channels
            );
            anyhow::ensure!(outputs > 0, "dense layer must produce outputs");
            Ok(ActivationShape {
                channels: outputs,
                size: 1,
            })
        }
    }
}

/// Borrowed weights and bias of one learned layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerParameters<'a> {
    pub weights: &'a [f32],
    pub biases: &'a [f32],
}

/// Immutable parameter blob plus the per-layer slices into it.
#[derive(Debug, Clone)]
pub struct NetworkParameters {
    blob: Vec<f32>,
    layout: Vec<ParameterSlice>,
}

impl NetworkParameters {
    /// Slice `blob` according to `architecture`.
    ///
    /// Fails unless the blob holds exactly `architecture.parameter_count()` floats.
    pub fn from_blob(architecture: &NetworkArchitecture, blob: Vec<f32>) -> Result<Self> {
        let expected = architecture.parameter_count();
        anyhow::ensure!(
            blob.len() == expected,
            "parameter blob holds {} floats but the architecture needs {expected}",
            blob.len()
        );
        Ok(Self {
            blob,
            layout: architecture.parameter_layout(),
        })
    }

    /// Whether these parameters were sliced for `architecture`'s layer table.
    pub fn fits(&self, architecture: &NetworkArchitecture) -> bool {
        self.layout == architecture.parameter_layout()
    }

    /// Number of learned layers.
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Parameters of the `index`-th learned layer.
    pub fn layer(&self, index: usize) -> Option<LayerParameters<'_>> {
        self.layout.get(index).map(|slice| LayerParameters {
            weights: &self.blob[slice.weights.clone()],
            biases: &self.blob[slice.bias.clone()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vggnet_utils::dataset::NETWORK_BYTES;

    #[test]
    fn vgg16_layout_matches_network_file() {
        let architecture = NetworkArchitecture::vgg16_cifar10();
        architecture.validate().expect("valid topology");
        assert_eq!(architecture.parameter_count(), 15_245_130);
        assert_eq!(
            architecture.parameter_count() * size_of::<f32>(),
            NETWORK_BYTES
        );
        assert_eq!(architecture.parameter_layout().len(), 16);
        assert_eq!(architecture.max_activation_len().unwrap(), 64 * 32 * 32);
    }

    #[test]
    fn layout_puts_weights_before_bias() {
        let architecture = NetworkArchitecture::vgg16_cifar10();
        let layout = architecture.parameter_layout();
        assert_eq!(layout[0].weights, 0..64 * 3 * 9);
        assert_eq!(layout[0].bias, 1728..1792);
        assert_eq!(layout[1].weights.start, 1792);
        let last = layout.last().unwrap();
        assert_eq!(last.bias.end, architecture.parameter_count());
        assert_eq!(last.bias.len(), 10);
    }

    #[test]
    fn blob_length_must_match() {
        let architecture = NetworkArchitecture::vgg16_cifar10();
        let err = NetworkParameters::from_blob(&architecture, vec![0.0; 100]).unwrap_err();
        assert!(err.to_string().contains("15245130"));
    }

    #[test]
    fn mismatched_channels_fail_validation() {
        let architecture = NetworkArchitecture {
            input_channels: 3,
            input_size: 2,
            classes: 4,
            layers: vec![
                LayerSpec::Conv {
                    in_channels: 4,
                    out_channels: 8,
                },
                LayerSpec::MaxPool,
                LayerSpec::Dense {
                    inputs: 8,
                    outputs: 4,
                },
            ],
        };
        assert!(architecture.validate().is_err());
    }

    #[test]
    fn dense_requires_unit_spatial_size() {
        let architecture = NetworkArchitecture {
            input_channels: 2,
            input_size: 4,
            classes: 3,
            layers: vec![
                LayerSpec::MaxPool,
                LayerSpec::Dense {
                    inputs: 2,
                    outputs: 3,
                },
            ],
        };
        let err = architecture.validate().unwrap_err();
        assert!(format!("{err:#}").contains("1x1"));
    }

    #[test]
    fn class_names_cover_every_label() {
        assert_eq!(class_name(0), "airplane");
        assert_eq!(class_name(9), "truck");
        assert_eq!(class_name(10), "unknown");
    }
}
