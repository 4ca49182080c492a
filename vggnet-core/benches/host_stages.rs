use criterion::{Criterion, black_box, criterion_group, criterion_main};
use vggnet_core::{
    ConvGeometry, ConvRequest, ConvolutionBackend, HostConvolution,
    layers::{classify, dense_forward, max_pool_2x2},
};

fn benchmark_pooling(c: &mut Criterion) {
    // conv1_2 output of one image.
    let input: Vec<f32> = (0..64 * 32 * 32).map(|i| (i % 251) as f32).collect();
    let mut output = vec![0.0; 64 * 16 * 16];
    c.bench_function("max_pool_2x2_64x32x32", |b| {
        b.iter(|| {
            max_pool_2x2(black_box(&input), &mut output, 64, 16);
            black_box(&output);
        })
    });
}

fn benchmark_dense(c: &mut Criterion) {
    let input: Vec<f32> = (0..512).map(|i| (i % 13) as f32 / 13.0).collect();
    let weights: Vec<f32> = (0..512 * 512).map(|i| (i % 7) as f32 / 70.0).collect();
    let biases = vec![0.1; 512];
    let mut output = vec![0.0; 512];
    c.bench_function("dense_forward_512x512", |b| {
        b.iter(|| {
            dense_forward(black_box(&input), &weights, &biases, &mut output);
            black_box(&output);
        })
    });
}

fn benchmark_classify(c: &mut Criterion) {
    let logits: Vec<f32> = (0..10).map(|i| i as f32 * 0.3).collect();
    c.bench_function("softmax_argmax_10", |b| {
        b.iter(|| {
            let mut values = logits.clone();
            black_box(classify(black_box(&mut values)));
        })
    });
}

fn benchmark_host_convolution(c: &mut Criterion) {
    let geometry = ConvGeometry {
        in_channels: 512,
        out_channels: 512,
        size: 2,
        batch_size: 1,
        active_count: 1,
    };
    let input: Vec<f32> = (0..geometry.input_len()).map(|i| (i % 9) as f32).collect();
    let weights: Vec<f32> = (0..geometry.weight_len())
        .map(|i| (i % 11) as f32 / 110.0)
        .collect();
    let biases = vec![0.0; 512];
    let mut output = vec![0.0; geometry.output_len()];
    c.bench_function("host_conv_512x512_2x2", |b| {
        b.iter(|| {
            let request = ConvRequest {
                input: black_box(&input),
                weights: &weights,
                biases: &biases,
                geometry,
            };
            HostConvolution
                .convolve(&request, &mut output)
                .expect("convolution");
            black_box(&output);
        })
    });
}

criterion_group!(
    benches,
    benchmark_pooling,
    benchmark_dense,
    benchmark_classify,
    benchmark_host_convolution
);
criterion_main!(benches);
