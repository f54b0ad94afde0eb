//! Exponential volume smoothing, applied once per callback per voice
//! (spec.md §4.7).
//!
//! Grounded on rf-engine::param_smoother's `ParamSmoother` — same
//! `current += coeff * (target - current)` update and convergence
//! snap-to-target — generalized to distinct rise/fall coefficients since
//! the spec requires asymmetric attack/release times.

use dm_core::SMOOTH_THRESHOLD;

/// Per-voice smoothing state (spec.md §3 Voice: `current_volume`,
/// `target_volume`, `rise_coeff`, `fall_coeff`, `smoothing_active`).
#[derive(Debug, Clone, Copy)]
pub struct VolumeSmoother {
    current: f32,
    target: f32,
    rise_coeff: f32,
    fall_coeff: f32,
    active: bool,
}

impl VolumeSmoother {
    /// `rise_time_ms`/`fall_time_ms` are per-voice time constants copied
    /// from engine configuration at voice creation (spec.md §4.7).
    pub fn new(initial: f32, rise_time_ms: f64, fall_time_ms: f64, sample_rate: f64) -> Self {
        Self {
            current: initial,
            target: initial,
            rise_coeff: coeff_for(rise_time_ms, sample_rate),
            fall_coeff: coeff_for(fall_time_ms, sample_rate),
            active: false,
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// If already converged, snap immediately; otherwise store the new
    /// target and (re)enable smoothing (spec.md §4.7).
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
        if (self.current - target).abs() < SMOOTH_THRESHOLD {
            self.current = target;
            self.active = false;
        } else {
            self.active = true;
        }
    }

    /// One smoothing step. No-op if already converged.
    pub fn tick(&mut self) {
        if !self.active {
            return;
        }
        if (self.current - self.target).abs() < SMOOTH_THRESHOLD {
            self.current = self.target;
            self.active = false;
            return;
        }
        let alpha = if self.current < self.target {
            self.rise_coeff
        } else {
            self.fall_coeff
        };
        self.current += alpha * (self.target - self.current);
    }

    /// True once the smoother has settled at (or below) the threshold at
    /// zero — the voice's node can be stopped (spec.md §4.7).
    pub fn converged_to_zero(&self) -> bool {
        self.target <= SMOOTH_THRESHOLD && self.current <= SMOOTH_THRESHOLD
    }
}

/// `alpha = 1 - exp(-dt / tau)` with `dt` the nominal callback period in
/// seconds and `tau` the time constant in milliseconds (spec.md §4.7).
fn coeff_for(time_constant_ms: f64, sample_rate: f64) -> f32 {
    let dt = dm_core::NOMINAL_BLOCK_SIZE as f64 / sample_rate;
    let tau = time_constant_ms / 1000.0;
    (1.0 - (-dt / tau).exp()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn converges_monotonically_toward_target() {
        let mut s = VolumeSmoother::new(0.0, 6.0, 12.0, 48000.0);
        s.set_target(1.0);
        let mut last = 0.0f32;
        for _ in 0..500 {
            s.tick();
            assert!(s.current() >= last - 1e-6);
            last = s.current();
        }
        assert_relative_eq!(s.current(), 1.0, epsilon = 1e-3);
        assert!(!s.is_active());
    }

    #[test]
    fn snaps_immediately_when_already_converged() {
        let mut s = VolumeSmoother::new(0.5, 6.0, 12.0, 48000.0);
        s.set_target(0.5 + 1e-6);
        assert!(!s.is_active());
    }

    #[test]
    fn fall_is_slower_than_rise() {
        let mut rise = VolumeSmoother::new(0.0, 6.0, 12.0, 48000.0);
        rise.set_target(1.0);
        let mut fall = VolumeSmoother::new(1.0, 6.0, 12.0, 48000.0);
        fall.set_target(0.0);

        rise.tick();
        fall.tick();
        // Same distance to target, but fall's longer time constant means
        // it moves a smaller fraction of that distance in one step.
        assert!(rise.current() > 1.0 - fall.current());
    }

    #[test]
    fn converged_to_zero_allows_stopping_node() {
        let mut s = VolumeSmoother::new(1.0, 6.0, 12.0, 48000.0);
        s.set_target(0.0);
        for _ in 0..2000 {
            s.tick();
        }
        assert!(s.converged_to_zero());
    }
}
