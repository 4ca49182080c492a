//! Stage timing accumulators.
//!
//! Timings are observational: they are collected on every run and only logged
//! when telemetry is enabled.

use std::{fmt, time::Duration};

/// Host-side wall time spent in each stage of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageTimings {
    /// All convolution calls, transfers included.
    pub convolution: Duration,
    /// Convolution time per block, a block being the convolutions between two pools.
    pub conv_blocks: Vec<Duration>,
    pub pooling: Duration,
    pub dense: Duration,
    /// Softmax plus arg-max.
    pub classification: Duration,
    pub batches: usize,
    pub images: usize,
}

impl StageTimings {
    pub(crate) fn record_conv(&mut self, block: usize, elapsed: Duration) {
        if self.conv_blocks.len() <= block {
            self.conv_blocks.resize(block + 1, Duration::ZERO);
        }
        self.conv_blocks[block] += elapsed;
        self.convolution += elapsed;
    }

    /// Sum of every stage.
    pub fn total(&self) -> Duration {
        self.convolution + self.pooling + self.dense + self.classification
    }
}

impl fmt::Display for StageTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let blocks = self
            .conv_blocks
            .iter()
            .map(|block| format!("{:.2}", block.as_secs_f64()))
            .collect::<Vec<_>>()
            .join(" + ");
        writeln!(
            f,
            "{} images in {} batches",
            self.images, self.batches
        )?;
        writeln!(
            f,
            "  - conv     : {:.6} sec = ({blocks}) sec",
            self.convolution.as_secs_f64()
        )?;
        writeln!(f, "  - pooling  : {:.6} sec", self.pooling.as_secs_f64())?;
        writeln!(f, "  - fc       : {:.6} sec", self.dense.as_secs_f64())?;
        write!(
            f,
            "  - classify : {:.6} sec",
            self.classification.as_secs_f64()
        )
    }
}

/// Cumulative counters of the GPU convolution dispatcher.
///
/// `prepare`, `execute` and `readback` are host wall-clock time around each
/// phase. `kernel` is the device's own measurement of the compute pass, taken
/// from timestamp queries; it stays zero on devices without
/// `TIMESTAMP_QUERY`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub calls: u64,
    /// Buffer allocation, uploads and binding.
    pub prepare: Duration,
    /// Submission until the results are ready to map.
    pub execute: Duration,
    /// Copying mapped results back to host memory.
    pub readback: Duration,
    /// Device time between the start and end of the convolution pass.
    pub kernel: Duration,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} convolution dispatches (host wall-clock)", self.calls)?;
        writeln!(
            f,
            "    - prepare  : {:.6} sec ({} bytes written)",
            self.prepare.as_secs_f64(),
            self.bytes_uploaded
        )?;
        writeln!(f, "    - execute  : {:.6} sec", self.execute.as_secs_f64())?;
        if self.kernel.is_zero() {
            writeln!(f, "      - kernel : n/a (no device timestamps)")?;
        } else {
            writeln!(
                f,
                "      - kernel : {:.6} sec (device timestamps)",
                self.kernel.as_secs_f64()
            )?;
        }
        write!(
            f,
            "    - readback : {:.6} sec ({} bytes read)",
            self.readback.as_secs_f64(),
            self.bytes_downloaded
        )
    }
}
