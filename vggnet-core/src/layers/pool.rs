/// 2x2 max pooling with stride 2 over one image.
///
/// `input` is `(channels, 2 * size, 2 * size)` and `output` is
/// `(channels, size, size)`. The running maximum starts at zero, so inputs are
/// expected to be non-negative (they always follow a ReLU in this network); a
/// block of negative values pools to zero.
pub fn max_pool_2x2(input: &[f32], output: &mut [f32], channels: usize, size: usize) {
    let out_plane = size * size;
    let in_plane = out_plane * 4;
    debug_assert_eq!(input.len(), channels * in_plane);
    debug_assert_eq!(output.len(), channels * out_plane);

    for (in_channel, out_channel) in input
        .chunks_exact(in_plane)
        .zip(output.chunks_exact_mut(out_plane))
    {
        for row in 0..size {
            for col in 0..size {
                let mut max = 0.0f32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let pixel = in_channel[(row * 2 + dy) * 2 * size + col * 2 + dx];
                        max = if max > pixel { max } else { pixel };
                    }
                }
                out_channel[row * size + col] = max;
            }
        }
    }
}
