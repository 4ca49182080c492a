use std::sync::Arc;
use vggnet_core::{
    ConvDispatcher, DeviceSession, HostConvolution, InferencePipeline, LayerSpec,
    NetworkArchitecture, NetworkParameters,
};
use vggnet_utils::gpu::{GpuAvailability, GpuContext, GpuContextOptions};

const CONFIDENCE_TOLERANCE: f32 = 1e-4;

fn gpu_session() -> Option<Arc<DeviceSession>> {
    match GpuContext::init_with_fallback(&GpuContextOptions::permissive()) {
        GpuAvailability::Available(ctx) => {
            Some(Arc::new(DeviceSession::from_context(ctx).expect("session")))
        }
        other => {
            eprintln!("Skipping GPU parity test: {other:?}");
            None
        }
    }
}

/// Two conv blocks on 8x8 inputs; the 260-channel convolution spans two filter tiles.
fn two_block_network() -> NetworkArchitecture {
    NetworkArchitecture {
        input_channels: 3,
        input_size: 8,
        classes: 10,
        layers: vec![
            LayerSpec::Conv {
                in_channels: 3,
                out_channels: 260,
            },
            LayerSpec::Conv {
                in_channels: 260,
                out_channels: 16,
            },
            LayerSpec::MaxPool,
            LayerSpec::Conv {
                in_channels: 16,
                out_channels: 8,
            },
            LayerSpec::MaxPool,
            LayerSpec::MaxPool,
            LayerSpec::Dense {
                inputs: 8,
                outputs: 12,
            },
            LayerSpec::Dense {
                inputs: 12,
                outputs: 10,
            },
        ],
    }
}

fn pattern(len: usize, scale: f32) -> Vec<f32> {
    (0..len)
        .map(|i| (((i * 2_654_435_761) % 1009) as f32 / 1009.0 - 0.45) * scale)
        .collect()
}

#[test]
fn gpu_pipeline_matches_host_pipeline() {
    let Some(session) = gpu_session() else {
        return;
    };
    let architecture = two_block_network();
    let blob = pattern(architecture.parameter_count(), 0.3);
    let images = pattern(7 * architecture.input_len(), 2.0);

    let host = InferencePipeline::new(
        architecture.clone(),
        NetworkParameters::from_blob(&architecture, blob.clone()).expect("parameters"),
        Box::new(HostConvolution),
        3,
    )
    .expect("host pipeline");
    let gpu = InferencePipeline::new(
        architecture.clone(),
        NetworkParameters::from_blob(&architecture, blob).expect("parameters"),
        Box::new(ConvDispatcher::new(session.clone())),
        3,
    )
    .expect("gpu pipeline");
    assert_eq!(gpu.backend_name(), "gpu");

    let expected = host.classify_all(&images).expect("host run");
    let actual = gpu.classify_all(&images).expect("gpu run");

    assert_eq!(actual.len(), 7);
    for (index, (gpu_prediction, host_prediction)) in
        actual.predictions().zip(expected.predictions()).enumerate()
    {
        let delta = (gpu_prediction.confidence - host_prediction.confidence).abs();
        assert!(
            delta <= CONFIDENCE_TOLERANCE,
            "image {index}: confidence {} vs {}",
            gpu_prediction.confidence,
            host_prediction.confidence
        );
        assert_eq!(
            gpu_prediction.label, host_prediction.label,
            "image {index}: labels differ"
        );
    }

    assert_eq!(session.live_buffers(), 0);
    let stats = session.dispatch_stats();
    // 3 conv layers x 3 batches.
    assert_eq!(stats.calls, 9);
    assert!(stats.bytes_downloaded > 0);
}
