//! Recovery from a starved measurement pipeline.
//!
//! When filters reject everything the beam is usually off the imager
//! entirely, and no amount of averaging will help. A recovery plan gets the
//! full listified parameter set plus the active pair index, does whatever
//! device motion it needs through the coordinator, and reports ok/not-ok
//! rather than raising; its own timeouts are its own business.
//!
//! `ThresholdRecovery` is the standard plan: scan the motor toward a limit
//! switch until a signal condition holds. Motors with a safe stop halt on the
//! first match; the rest scan the whole range and settle on the midpoint of
//! the widest satisfying region.

use std::time::Duration;

use tracing::{debug, info};

use crate::beamline::Beamline;
use crate::error::{AlignError, Result};
use crate::stream::SourceRef;

/// The orchestrator's view of the run handed to a recovery plan. Plans are
/// free to ignore most of it.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    /// Index of the pair whose measurement starved.
    pub index: usize,
    pub goals: Vec<f64>,
    pub starts: Vec<Option<f64>>,
    pub first_steps: Vec<f64>,
    pub gradients: Vec<Option<f64>>,
    pub detector_fields: Vec<String>,
    pub motor_fields: Vec<String>,
    pub tolerances: Vec<f64>,
    pub averages: Vec<usize>,
    pub tol_scaling: Vec<Option<f64>>,
    pub overshoot: f64,
    pub max_walks: Option<usize>,
    pub timeout: Option<Duration>,
}

pub trait RecoveryPlan {
    /// Attempt to restore a measurable beam. `Ok(true)` means the pair is
    /// worth retrying; `Ok(false)` means give up on it. Only device faults
    /// the plan cannot absorb should surface as errors.
    fn attempt(&mut self, bl: &mut Beamline, ctx: &RecoveryContext) -> Result<bool>;
}

impl<F> RecoveryPlan for F
where
    F: FnMut(&mut Beamline, &RecoveryContext) -> Result<bool>,
{
    fn attempt(&mut self, bl: &mut Beamline, ctx: &RecoveryContext) -> Result<bool> {
        self(bl, ctx)
    }
}

/// Scan a motor toward a limit until `signal` satisfies a threshold.
pub struct ThresholdRecovery {
    signal: SourceRef,
    signal_field: String,
    motor: usize,
    threshold: f64,
    dir_initial: i8,
    timeout: Option<Duration>,
    try_reverse: bool,
    ceil: bool,
    off_limit: f64,
    has_stop: bool,
    scan_points: usize,
}

impl ThresholdRecovery {
    /// Watch `signal_field` on `signal` while scanning `motor`.
    /// `dir_initial` > 0 scans toward the high limit first.
    pub fn new(signal: SourceRef, signal_field: impl Into<String>, motor: usize) -> Self {
        Self {
            signal,
            signal_field: signal_field.into(),
            motor,
            threshold: 0.0,
            dir_initial: 1,
            timeout: None,
            try_reverse: true,
            ceil: true,
            off_limit: 0.0,
            has_stop: true,
            scan_points: 25,
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn direction(mut self, dir_initial: i8) -> Self {
        self.dir_initial = if dir_initial >= 0 { 1 } else { -1 };
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn try_reverse(mut self, try_reverse: bool) -> Self {
        self.try_reverse = try_reverse;
        self
    }

    /// `true` looks for signal >= threshold; `false` for signal <= threshold.
    pub fn ceil(mut self, ceil: bool) -> Self {
        self.ceil = ceil;
        self
    }

    /// Stand-off distance from the limit, for motors that refuse to park
    /// exactly on their switch.
    pub fn off_limit(mut self, off_limit: f64) -> Self {
        self.off_limit = off_limit;
        self
    }

    /// Motors without a safe stop scan the whole range and return to the
    /// midpoint of the widest satisfying region instead of halting mid-scan.
    pub fn has_stop(mut self, has_stop: bool) -> Self {
        self.has_stop = has_stop;
        self
    }

    pub fn scan_points(mut self, scan_points: usize) -> Self {
        self.scan_points = scan_points.max(2);
        self
    }

    fn condition(&self, x: f64) -> bool {
        if self.ceil {
            x >= self.threshold
        } else {
            x <= self.threshold
        }
    }

    fn limit_toward(&self, bl: &Beamline, dir: i8) -> Result<f64> {
        let (low, high) = bl.motor_limits(self.motor);
        let limit = if dir > 0 {
            high.map(|h| h - self.off_limit)
        } else {
            low.map(|l| l + self.off_limit)
        };
        limit.ok_or_else(|| {
            AlignError::Recovery(format!(
                "motor {} has no limit to scan toward",
                bl.motor_name(self.motor)
            ))
            .into()
        })
    }

    /// Scan from the current position toward the limit, sampling the signal
    /// at each step. Returns true when recovered.
    fn scan(&mut self, bl: &mut Beamline, dir: i8, timeout: Option<Duration>) -> Result<bool> {
        let setpoint = self.limit_toward(bl, dir)?;
        let from = bl.motor_position(self.motor);
        debug!(from, setpoint, "threshold recovery scan");
        let clock = std::sync::Arc::clone(bl.clock());
        let t0 = clock.now();

        let n = self.scan_points;
        let mut satisfied: Vec<(f64, bool)> = Vec::with_capacity(n);
        for k in 1..=n {
            if let Some(t) = timeout
                && clock.now().saturating_duration_since(t0) > t
            {
                info!("recovery scan timed out");
                break;
            }
            bl.checkpoint()?;
            let pos = from + (setpoint - from) * (k as f64) / (n as f64);
            bl.set_motor(self.motor, pos, None)?;
            let value = bl.read_signal(self.signal, &self.signal_field)?;
            let ok = value.is_finite() && self.condition(value);
            if self.has_stop && ok {
                bl.stop_motor(self.motor)?;
                info!(pos, value, "recovered at threshold");
                return Ok(true);
            }
            satisfied.push((pos, ok));
        }

        if self.has_stop {
            return Ok(false);
        }

        // No safe stop: pick the middle of the largest satisfying interval.
        let mut best: Option<(f64, f64)> = None;
        let mut run: Option<(f64, f64)> = None; // (first ok pos, last ok pos)
        let mut close = |run: &mut Option<(f64, f64)>, best: &mut Option<(f64, f64)>| {
            if let Some((start, end)) = run.take() {
                let width = (end - start).abs();
                if best.is_none_or(|(_, w)| width > w) {
                    *best = Some(((start + end) / 2.0, width));
                }
            }
        };
        for &(pos, ok) in &satisfied {
            if ok {
                match &mut run {
                    Some((_, end)) => *end = pos,
                    None => run = Some((pos, pos)),
                }
            } else {
                close(&mut run, &mut best);
            }
        }
        close(&mut run, &mut best);
        match best {
            Some((mid, width)) => {
                info!(mid, width, "returning to the widest satisfying region");
                bl.set_motor(self.motor, mid, None)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl RecoveryPlan for ThresholdRecovery {
    fn attempt(&mut self, bl: &mut Beamline, _ctx: &RecoveryContext) -> Result<bool> {
        let dir = self.dir_initial;
        if self.scan(bl, dir, self.timeout)? {
            return Ok(true);
        }
        if self.try_reverse {
            debug!("first direction failed, trying the reverse");
            let doubled = self.timeout.map(|t| t * 2);
            return self.scan(bl, -dir, doubled);
        }
        info!("recovery failed in the initial direction");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ClosureImager, TestMotor};

    fn ctx() -> RecoveryContext {
        RecoveryContext {
            index: 0,
            goals: vec![0.0],
            starts: vec![None],
            first_steps: vec![1.0],
            gradients: vec![None],
            detector_fields: vec!["centroid_x".to_string()],
            motor_fields: vec!["pitch".to_string()],
            tolerances: vec![5.0],
            averages: vec![1],
            tol_scaling: vec![None],
            overshoot: 0.0,
            max_walks: None,
            timeout: None,
        }
    }

    fn line_with_window(lo: f64, hi: f64, start: f64) -> Beamline {
        let motor = TestMotor::at("m1", start).with_limits(-10.0, 10.0);
        let pos = motor.position_handle();
        // Signal is high only inside [lo, hi].
        let imager = ClosureImager::new("img1", move || {
            let p = *pos.lock().unwrap();
            if (lo..=hi).contains(&p) { 1.0 } else { 0.0 }
        });
        Beamline::builder().add_pair(imager, motor).build().unwrap()
    }

    #[test]
    fn stop_on_match_halts_inside_the_window() {
        let mut bl = line_with_window(2.0, 6.0, 0.0);
        let mut plan = ThresholdRecovery::new(SourceRef::Imager(0), "centroid_x", 0)
            .threshold(0.5)
            .direction(1)
            .scan_points(50);
        assert!(plan.attempt(&mut bl, &ctx()).unwrap());
        let p = bl.motor_position(0);
        assert!((2.0..=6.0).contains(&p), "stopped at {p}");
    }

    #[test]
    fn reverse_direction_finds_a_window_behind_us() {
        let mut bl = line_with_window(-8.0, -4.0, 0.0);
        let mut plan = ThresholdRecovery::new(SourceRef::Imager(0), "centroid_x", 0)
            .threshold(0.5)
            .direction(1)
            .scan_points(50);
        assert!(plan.attempt(&mut bl, &ctx()).unwrap());
        let p = bl.motor_position(0);
        assert!((-8.0..=-4.0).contains(&p), "stopped at {p}");
    }

    #[test]
    fn no_reverse_reports_not_ok() {
        let mut bl = line_with_window(-8.0, -4.0, 0.0);
        let mut plan = ThresholdRecovery::new(SourceRef::Imager(0), "centroid_x", 0)
            .threshold(0.5)
            .direction(1)
            .try_reverse(false)
            .scan_points(20);
        assert!(!plan.attempt(&mut bl, &ctx()).unwrap());
    }

    #[test]
    fn widest_region_scan_parks_at_the_middle() {
        let mut bl = line_with_window(2.0, 8.0, -10.0);
        let mut plan = ThresholdRecovery::new(SourceRef::Imager(0), "centroid_x", 0)
            .threshold(0.5)
            .direction(1)
            .has_stop(false)
            .scan_points(100);
        assert!(plan.attempt(&mut bl, &ctx()).unwrap());
        let p = bl.motor_position(0);
        assert!((p - 5.0).abs() < 0.5, "parked at {p}");
    }

    #[test]
    fn missing_limits_surface_as_recovery_errors() {
        let motor = TestMotor::at("m1", 0.0);
        let imager = ClosureImager::new("img1", || 1.0);
        let mut bl = Beamline::builder().add_pair(imager, motor).build().unwrap();
        let mut plan = ThresholdRecovery::new(SourceRef::Imager(0), "centroid_x", 0);
        let err = plan.attempt(&mut bl, &ctx()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::Recovery(_))
        ));
    }

    #[test]
    fn ceil_false_looks_for_a_floor() {
        let motor = TestMotor::at("m1", 0.0).with_limits(-10.0, 10.0);
        let pos = motor.position_handle();
        let imager = ClosureImager::new("img1", move || {
            let p = *pos.lock().unwrap();
            if p > 5.0 { 0.0 } else { 100.0 }
        });
        let mut bl = Beamline::builder().add_pair(imager, motor).build().unwrap();
        let mut plan = ThresholdRecovery::new(SourceRef::Imager(0), "centroid_x", 0)
            .threshold(10.0)
            .ceil(false)
            .direction(1)
            .scan_points(40);
        assert!(plan.attempt(&mut bl, &ctx()).unwrap());
        assert!(bl.motor_position(0) > 5.0);
    }
}
