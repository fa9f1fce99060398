//! The inner 1-D search: step one motor until one detector field reaches a
//! target.
//!
//! The relationship between pitch and centroid is assumed linear but is not
//! known up front. The first move is either computed from a seed gradient or
//! is a naive probe step; every measurement after that feeds an online fit,
//! and each next position is the fit's backsolve of the target. When the fit
//! stops explaining the data (direction-reversal artifacts, stuck detectors)
//! the point buffer is dumped and the walk reseeds from wherever it stands.

use tracing::{debug, info, warn};

use crate::beamline::Beamline;
use crate::error::Result;
use crate::filters::Filters;
use crate::fit::LinearFit;
use crate::measure::{DelaySchedule, measure_average};
use crate::stream::{Document, SourceRef, field_key};

/// Fits with |r| at or below this explain too little to steer by.
pub const CORRELATION_FLOOR: f64 = 0.5;

/// Parameters of one walk.
#[derive(Debug, Clone)]
pub struct WalkCfg {
    /// Target detector reading, in detector units.
    pub target: f64,
    /// Base position for the naive probe; defaults to the measured readback.
    pub start: Option<f64>,
    /// Seed slope in detector/motor units; enables a model-based first move.
    pub gradient: Option<f64>,
    /// Naive probe size, used when no gradient is available.
    pub first_step: f64,
    pub tolerance: f64,
    /// Samples averaged per measurement.
    pub average: usize,
    pub delay: DelaySchedule,
    /// Step budget; exhausting it returns the last measurement and lets the
    /// caller judge.
    pub max_steps: Option<usize>,
    pub detector_field: String,
    pub motor_field: String,
    pub min_valid: usize,
}

impl WalkCfg {
    pub fn to(target: f64) -> Self {
        Self {
            target,
            start: None,
            gradient: None,
            first_step: 1.0,
            tolerance: 20.0,
            average: 1,
            delay: DelaySchedule::None,
            max_steps: None,
            detector_field: "centroid_x".to_string(),
            motor_field: "pitch".to_string(),
            min_valid: 1,
        }
    }
}

/// Drive `motor` until `imager`'s detector field is within tolerance of the
/// target, or the step budget runs out. Returns the last centroid and the
/// fit accumulated along the way.
pub fn walk_to_pixel(
    bl: &mut Beamline,
    imager: usize,
    motor: usize,
    system: &[SourceRef],
    filters: &Filters,
    cfg: &WalkCfg,
) -> Result<(f64, LinearFit)> {
    let y_key = field_key(bl.imager_name(imager), &cfg.detector_field);
    let x_key = field_key(bl.motor_name(motor), &cfg.motor_field);
    let mut model = LinearFit::new(y_key.clone(), x_key.clone());

    let mut sources = vec![SourceRef::Imager(imager), SourceRef::Motor(motor)];
    sources.extend_from_slice(system);
    let fields = [cfg.detector_field.as_str(), cfg.motor_field.as_str()];

    let measure = |bl: &mut Beamline, model: &mut LinearFit| -> Result<(f64, f64)> {
        let avgs = measure_average(
            bl,
            &sources,
            &fields,
            cfg.average,
            &cfg.delay,
            filters,
            cfg.min_valid,
        )?;
        let (c, p) = (avgs[0], avgs[1]);
        let point: Document = [(x_key.clone(), p), (y_key.clone(), c)]
            .into_iter()
            .collect();
        model.ingest(&point);
        Ok((c, p))
    };

    let (mut center, mut pos) = measure(bl, &mut model)?;
    debug!(center, pos, target = cfg.target, "walk initial measurement");
    if (center - cfg.target).abs() <= cfg.tolerance {
        // Nothing to do; no move is issued.
        return Ok((center, model));
    }

    let seed = |base: f64, c: f64, p: f64| -> f64 {
        match cfg.gradient {
            Some(g) => {
                let intercept = c - g * p;
                (cfg.target - intercept) / g
            }
            None => base + cfg.first_step,
        }
    };
    let start = cfg.start.unwrap_or(pos);
    let mut next_pos = seed(start, center, pos);

    let mut step = 0usize;
    while (center - cfg.target).abs() > cfg.tolerance {
        if let Some(max) = cfg.max_steps
            && step >= max
        {
            info!(step, center, "walk exhausted its step budget");
            break;
        }
        bl.checkpoint()?;
        debug!(step, next_pos, "walk step");
        bl.set_motor(motor, next_pos, None)?;
        (center, pos) = measure(bl, &mut model)?;

        match model.result() {
            Some(fit) if fit.slope != 0.0 && fit.r_abs > CORRELATION_FLOOR => {
                next_pos = (cfg.target - fit.intercept) / fit.slope;
            }
            _ => {
                warn!("fit went bad, dumping stored points");
                model.reset_keep_last();
                next_pos = seed(pos, center, pos);
                step = 0;
            }
        }
        step += 1;
    }

    debug!(center, slope = ?model.result().map(|f| f.slope), "walk done");
    Ok((center, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamline::Beamline;
    use crate::error::AlignError;
    use crate::mocks::{FaultyMotor, LinearImager, TestImager, TestMotor};
    use crate::stream::{Command, SetPoint};

    fn one_mirror_line(gradient: f64, offset: f64) -> Beamline {
        let motor = TestMotor::at("m1", 0.0);
        let imager = LinearImager::new("img1", offset).coupled(motor.position_handle(), gradient, 0.0);
        Beamline::builder().add_pair(imager, motor).build().unwrap()
    }

    fn moves(bl: &Beamline) -> usize {
        bl.journal()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Command::Set {
                        target: SetPoint::Position(_),
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn naive_probe_converges_on_a_linear_system() {
        let mut bl = one_mirror_line(5.0, 2.0);
        let mut cfg = WalkCfg::to(200.0);
        cfg.first_step = 1e-3;
        cfg.tolerance = 1.0;
        cfg.max_steps = Some(10);
        let (center, model) = walk_to_pixel(&mut bl, 0, 0, &[], &Filters::new(), &cfg).unwrap();
        assert!((center - 200.0).abs() <= 1.0);
        assert!((model.result().unwrap().slope - 5.0).abs() < 1e-6);
    }

    #[test]
    fn exact_gradient_reaches_target_in_one_move() {
        let mut bl = one_mirror_line(-8000.0, 300.0);
        let mut cfg = WalkCfg::to(240.0);
        cfg.gradient = Some(-8000.0);
        cfg.tolerance = 5.0;
        cfg.max_steps = Some(10);
        let (center, _) = walk_to_pixel(&mut bl, 0, 0, &[], &Filters::new(), &cfg).unwrap();
        assert!((center - 240.0).abs() <= 5.0);
        assert_eq!(moves(&bl), 1);
    }

    #[test]
    fn already_in_tolerance_issues_no_moves() {
        let mut bl = one_mirror_line(5.0, 199.5);
        let mut cfg = WalkCfg::to(200.0);
        cfg.tolerance = 1.0;
        let (center, model) = walk_to_pixel(&mut bl, 0, 0, &[], &Filters::new(), &cfg).unwrap();
        assert_eq!(center, 199.5);
        assert_eq!(moves(&bl), 0);
        assert!(model.result().is_none());
    }

    #[test]
    fn deadband_triggers_resets_then_converges() {
        // The imager ignores the motor below pitch 1.5; every flat step
        // collapses the correlation and the walk re-probes from where it
        // stands, crossing the deadband one first_step at a time.
        use crate::mocks::ClosureImager;
        let motor = TestMotor::at("m1", 0.0);
        let pos = motor.position_handle();
        let imager = ClosureImager::new("img1", move || {
            let p = *pos.lock().unwrap();
            if p < 1.5 { 100.0 } else { 100.0 + 5.0 * (p - 1.5) }
        });
        let mut bl = Beamline::builder().add_pair(imager, motor).build().unwrap();
        let mut cfg = WalkCfg::to(200.0);
        cfg.first_step = 0.5;
        cfg.tolerance = 1.0;
        cfg.max_steps = Some(10);
        let (center, model) = walk_to_pixel(&mut bl, 0, 0, &[], &Filters::new(), &cfg).unwrap();
        assert!((center - 200.0).abs() <= 1.0);
        // The surviving fit was rebuilt after the last reset.
        assert!((model.result().unwrap().slope - 5.0).abs() < 1e-6);
        assert!(moves(&bl) > 3);
    }

    #[test]
    fn zero_budget_returns_the_initial_measurement() {
        let mut bl = one_mirror_line(5.0, 0.0);
        let mut cfg = WalkCfg::to(200.0);
        cfg.tolerance = 1.0;
        cfg.max_steps = Some(0);
        let (center, _) = walk_to_pixel(&mut bl, 0, 0, &[], &Filters::new(), &cfg).unwrap();
        assert_eq!(center, 0.0);
        assert_eq!(moves(&bl), 0);
    }

    #[test]
    fn motor_fault_is_fatal() {
        let motor = FaultyMotor::at("m1", 0.0);
        let imager = TestImager::at("img1", 100.0);
        let mut bl = Beamline::builder().add_pair(imager, motor).build().unwrap();
        let mut cfg = WalkCfg::to(200.0);
        cfg.tolerance = 1.0;
        let err = walk_to_pixel(&mut bl, 0, 0, &[], &Filters::new(), &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::MotorFault { .. })
        ));
    }

    #[test]
    fn filter_starvation_propagates() {
        let mut bl = one_mirror_line(5.0, 0.0);
        let mut cfg = WalkCfg::to(200.0);
        cfg.tolerance = 1.0;
        let filters = Filters::new().with("img1_centroid_x", |_| false);
        let err = walk_to_pixel(&mut bl, 0, 0, &[], &filters, &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::FilterCount { .. })
        ));
    }
}
