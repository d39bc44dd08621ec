//! Wall-clock timing of the linker's phases, reported via `tracing`.

use std::time::Instant;

pub struct PhaseTimer {
    name: &'static str,
    start: Instant,
}

impl PhaseTimer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        tracing::debug!(
            target: "timing",
            phase = self.name,
            micros = self.start.elapsed().as_micros() as u64,
        );
    }
}

/// Times the rest of the enclosing scope as a named linker phase.
#[macro_export]
macro_rules! timing_phase {
    ($name:literal) => {
        let _phase_timer = $crate::timing::PhaseTimer::start($name);
    };
}

/// As for `timing_phase!`, but for phases that run once per worker or per file and would
/// otherwise swamp the timing output. Compiled out unless verbose timing is enabled.
#[macro_export]
macro_rules! verbose_timing_phase {
    ($name:literal) => {
        let _phase_timer = if cfg!(feature = "verbose-timing") {
            Some($crate::timing::PhaseTimer::start($name))
        } else {
            None
        };
    };
}
