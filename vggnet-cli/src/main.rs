mod args;
mod config;
mod report;

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};
use vggnet_core::{
    ConvDispatcher, ConvolutionBackend, DeviceSession, HostConvolution, InferencePipeline,
    NetworkArchitecture, NetworkParameters,
};
use vggnet_utils::{
    BackendKind, GpuContextOptions, configure_telemetry, init_logging, list_adapters,
    read_images, read_labels, read_network, telemetry_enabled,
};

use crate::{
    args::InferArgs,
    config::{apply_cli_overrides, load_settings},
    report::{compare_report_files, prediction_records, write_json, write_report},
};

fn main() -> Result<()> {
    init_logging(LevelFilter::Info)?;
    let args = InferArgs::parse();

    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, &args);
    settings.validate()?;
    configure_telemetry(
        settings.telemetry.enabled,
        settings.telemetry.level_filter(),
    );
    let gpu_options = GpuContextOptions::from(&settings.gpu);

    if args.list_adapters {
        let adapters = list_adapters(&gpu_options);
        if adapters.is_empty() {
            println!("No adapters found");
        }
        for adapter in adapters {
            println!("{adapter}");
        }
        return Ok(());
    }

    let data = &settings.data;
    let num_images = data.num_images;
    info!(
        "Reading {num_images} image(s) from {}",
        data.images.display()
    );
    let images = read_images(&data.images, num_images)
        .with_context(|| format!("failed to read images from {}", data.images.display()))?;
    let truth = read_labels(&data.labels, num_images)
        .with_context(|| format!("failed to read labels from {}", data.labels.display()))?;
    let blob = read_network(&data.network)
        .with_context(|| format!("failed to read network from {}", data.network.display()))?;

    let architecture = NetworkArchitecture::vgg16_cifar10();
    let parameters = NetworkParameters::from_blob(&architecture, blob)?;

    let (backend, session) = build_backend(settings.inference.backend, &gpu_options)?;
    let pipeline = InferencePipeline::new(
        architecture,
        parameters,
        backend,
        settings.inference.batch_size,
    )?;
    info!(
        "Classifying {num_images} image(s) in batches of {} on the {} backend",
        pipeline.batch_size(),
        pipeline.backend_name()
    );

    let started = Instant::now();
    let output = pipeline.classify_all(&images)?;
    println!("Elapsed time: {:.6} sec", started.elapsed().as_secs_f64());

    write_report(&args.output, &output, &truth)?;
    let accuracy = output.accuracy(&truth);
    info!(
        "Wrote {} prediction(s) to {} (accuracy {accuracy:.6})",
        output.len(),
        args.output.display()
    );

    if let Some(path) = args.json.as_ref() {
        write_json(path, &prediction_records(&output, &truth))?;
        info!("Wrote JSON predictions to {}", path.display());
    }

    if telemetry_enabled() {
        info!("Stage profile:\n{}", output.timings);
        if let Some(session) = session.as_ref() {
            info!("Dispatch profile:\n{}", session.dispatch_stats());
        }
    }

    if let Some(reference) = args.compare.as_ref() {
        let comparison = compare_report_files(&args.output, reference)?;
        if comparison.confidence_mismatches > 0 {
            warn!(
                "{} of {} confidence(s) differ from {} by more than the tolerance (max delta {:.6})",
                comparison.confidence_mismatches,
                comparison.images,
                reference.display(),
                comparison.max_confidence_delta
            );
        }
        anyhow::ensure!(
            comparison.labels_match(),
            "{} of {} label(s) differ from {}",
            comparison.label_mismatches,
            comparison.images,
            reference.display()
        );
        info!(
            "All {} label(s) match {}",
            comparison.images,
            reference.display()
        );
    }

    Ok(())
}

/// Build the convolution backend named by the settings. The GPU session is
/// returned alongside so its dispatch counters can be reported after the run.
fn build_backend(
    kind: BackendKind,
    options: &GpuContextOptions,
) -> Result<(Box<dyn ConvolutionBackend>, Option<Arc<DeviceSession>>)> {
    match kind {
        BackendKind::Gpu => {
            let session = Arc::new(DeviceSession::initialize(options)?);
            let dispatcher = ConvDispatcher::new(Arc::clone(&session));
            Ok((Box::new(dispatcher), Some(session)))
        }
        BackendKind::Host => {
            warn!("Running convolutions on the host; expect a slow run");
            Ok((Box::new(HostConvolution), None))
        }
    }
}
