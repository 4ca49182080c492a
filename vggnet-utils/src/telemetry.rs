//! Opt-in timing output for inference runs.
//!
//! A [`TimingGuard`] measures one scope. When it drops it adds the elapsed time
//! to the stage total it was given, if any, and logs the duration under
//! [`TELEMETRY_TARGET`] once telemetry has been switched on with [`configure`]
//! at a level that lets the guard's level through.

use std::{
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

pub const TELEMETRY_TARGET: &str = "vggnet::telemetry";

static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(false);
static TELEMETRY_LEVEL: AtomicU8 = AtomicU8::new(0);

/// Times a scope; see the module docs.
#[must_use = "the scope is timed until the guard drops"]
pub struct TimingGuard<'a> {
    label: &'static str,
    level: Level,
    start: Instant,
    total: Option<&'a mut Duration>,
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if let Some(total) = self.total.as_deref_mut() {
            *total += elapsed;
        }
        if telemetry_allows(self.level) && log_enabled!(target: TELEMETRY_TARGET, self.level) {
            log!(
                target: TELEMETRY_TARGET,
                self.level,
                "{} completed in {:.2?}",
                self.label,
                elapsed
            );
        }
    }
}

/// Log-only guard for a whole operation.
pub fn timing_guard(label: &'static str, level: Level) -> TimingGuard<'static> {
    TimingGuard {
        label,
        level,
        start: Instant::now(),
        total: None,
    }
}

/// Guard that also accumulates into `total`, one of the per-stage durations
/// of a run.
pub fn stage_timer<'a>(label: &'static str, level: Level, total: &'a mut Duration) -> TimingGuard<'a> {
    TimingGuard {
        label,
        level,
        start: Instant::now(),
        total: Some(total),
    }
}

/// Configure the global telemetry state.
pub fn configure(enabled: bool, level: LevelFilter) {
    TELEMETRY_ENABLED.store(enabled, Ordering::Relaxed);
    TELEMETRY_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn telemetry_enabled() -> bool {
    TELEMETRY_ENABLED.load(Ordering::Relaxed)
}

fn telemetry_level() -> LevelFilter {
    match TELEMETRY_LEVEL.load(Ordering::Relaxed) {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Returns `true` when telemetry is enabled and `level` is within the threshold.
pub fn telemetry_allows(level: Level) -> bool {
    telemetry_enabled() && level <= telemetry_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_atomic() {
        configure(true, LevelFilter::Debug);
        assert!(telemetry_enabled());
        assert!(telemetry_allows(Level::Info));
        assert!(telemetry_allows(Level::Debug));
        assert!(!telemetry_allows(Level::Trace));

        configure(false, LevelFilter::Trace);
        assert!(!telemetry_allows(Level::Error));
    }

    #[test]
    fn stage_timer_accumulates_across_scopes() {
        let mut total = Duration::ZERO;
        for _ in 0..2 {
            let _timer = stage_timer("pooling", Level::Trace, &mut total);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(total >= Duration::from_millis(4));
    }
}
