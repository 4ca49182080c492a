use crate::{error::ComputeError, network::KERNEL_AREA};

/// Shape of one batched convolution call.
///
/// Buffers are laid out image after image, each image `(channels, size, size)`.
/// `batch_size` is the nominal batch the dispatch grid is sized for while
/// `active_count` images actually carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub in_channels: usize,
    pub out_channels: usize,
    pub size: usize,
    pub batch_size: usize,
    pub active_count: usize,
}

impl ConvGeometry {
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.in_channels == 0 || self.out_channels == 0 || self.size == 0 {
            return Err(ComputeError::Geometry(format!(
                "channels and size must be non-zero (D1={}, D2={}, N={})",
                self.in_channels, self.out_channels, self.size
            )));
        }
        if self.active_count == 0 || self.active_count > self.batch_size {
            return Err(ComputeError::Geometry(format!(
                "active image count {} must be within 1..={}",
                self.active_count, self.batch_size
            )));
        }
        Ok(())
    }

    /// Pixels per channel plane.
    pub fn plane(&self) -> usize {
        self.size * self.size
    }

    pub fn input_len(&self) -> usize {
        self.in_channels * self.plane() * self.active_count
    }

    pub fn output_len(&self) -> usize {
        self.out_channels * self.plane() * self.active_count
    }

    pub fn weight_len(&self) -> usize {
        self.out_channels * self.in_channels * KERNEL_AREA
    }
}

/// Borrowed operands of one convolution.
#[derive(Debug, Clone, Copy)]
pub struct ConvRequest<'a> {
    /// `active_count` images of `(in_channels, size, size)`.
    pub input: &'a [f32],
    /// `(out_channels, in_channels, 3, 3)`.
    pub weights: &'a [f32],
    pub biases: &'a [f32],
    pub geometry: ConvGeometry,
}

impl ConvRequest<'_> {
    /// Check the geometry and every operand length, `output` included.
    pub fn validate(&self, output_len: usize) -> Result<(), ComputeError> {
        let geometry = &self.geometry;
        geometry.validate()?;
        check_len("convolution input", geometry.input_len(), self.input.len())?;
        check_len("convolution weights", geometry.weight_len(), self.weights.len())?;
        check_len("convolution bias", geometry.out_channels, self.biases.len())?;
        check_len("convolution output", geometry.output_len(), output_len)
    }
}

fn check_len(operation: &'static str, expected: usize, actual: usize) -> Result<(), ComputeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ComputeError::Length {
            operation,
            expected,
            actual,
        })
    }
}

/// Executes the convolution layers of the network.
///
/// Every implementation computes a zero-padded 3x3 convolution with stride 1
/// and applies `max(0, sum + bias)` to each output element. `output` must be
/// exactly `geometry.output_len()` long and is fully overwritten.
pub trait ConvolutionBackend: std::fmt::Debug {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    fn convolve(&self, request: &ConvRequest<'_>, output: &mut [f32]) -> Result<(), ComputeError>;
}

/// Straightforward host implementation, used for verification and machines
/// without a GPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostConvolution;

impl ConvolutionBackend for HostConvolution {
    fn name(&self) -> &'static str {
        "host"
    }

    fn convolve(&self, request: &ConvRequest<'_>, output: &mut [f32]) -> Result<(), ComputeError> {
        request.validate(output.len())?;
        let ConvGeometry {
            in_channels,
            out_channels,
            size,
            ..
        } = request.geometry;
        let plane = request.geometry.plane();
        let in_image = in_channels * plane;
        let out_image = out_channels * plane;

        for (image, out) in output.chunks_exact_mut(out_image).enumerate() {
            let input = &request.input[image * in_image..(image + 1) * in_image];
            for (d2, out_plane) in out.chunks_exact_mut(plane).enumerate() {
                out_plane.fill(0.0);
                for d1 in 0..in_channels {
                    let filter_start = (d2 * in_channels + d1) * KERNEL_AREA;
                    let filter = &request.weights[filter_start..filter_start + KERNEL_AREA];
                    convolve_plane(&input[d1 * plane..(d1 + 1) * plane], out_plane, filter, size);
                }
                let bias = request.biases[d2];
                for value in out_plane.iter_mut() {
                    *value = (*value + bias).max(0.0);
                }
            }
        }
        Ok(())
    }
}

/// Accumulate one input plane filtered by a 3x3 kernel into `output`.
fn convolve_plane(input: &[f32], output: &mut [f32], filter: &[f32], size: usize) {
    for row in 0..size {
        for col in 0..size {
            let mut sum = 0.0f32;
            for ky in 0..3 {
                for kx in 0..3 {
                    let (Some(y), Some(x)) = ((row + ky).checked_sub(1), (col + kx).checked_sub(1))
                    else {
                        continue;
                    };
                    if y < size && x < size {
                        sum += input[y * size + x] * filter[ky * 3 + kx];
                    }
                }
            }
            output[row * size + col] += sum;
        }
    }
}
