/// Fully connected layer with fused bias + ReLU for one image.
///
/// `weights` is row-major `(outputs, inputs)`: output `j` reads
/// `weights[j * inputs..(j + 1) * inputs]`.
pub fn dense_forward(input: &[f32], weights: &[f32], biases: &[f32], output: &mut [f32]) {
    let inputs = input.len();
    assert_eq!(weights.len(), inputs * output.len(), "dense weight count");
    assert_eq!(biases.len(), output.len(), "dense bias count");

    for ((out, row), bias) in output
        .iter_mut()
        .zip(weights.chunks_exact(inputs))
        .zip(biases)
    {
        let sum: f32 = input.iter().zip(row).map(|(x, w)| x * w).sum();
        *out = (sum + bias).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_affine_then_relu() {
        let input = [1.0, 2.0, 3.0];
        let weights = [
            1.0, 0.0, 0.0, //
            0.0, 1.0, 1.0, //
            -1.0, -1.0, 0.0,
        ];
        let biases = [0.5, -1.0, 2.0];
        let mut output = [0.0; 3];
        dense_forward(&input, &weights, &biases, &mut output);
        assert_eq!(output, [1.5, 4.0, 0.0]);
    }

    #[test]
    fn zero_weights_pass_bias_through_relu() {
        let input = [7.0; 4];
        let mut output = [9.0; 2];
        dense_forward(&input, &[0.0; 8], &[1.0, -1.0], &mut output);
        assert_eq!(output, [1.0, 0.0]);
    }
}
