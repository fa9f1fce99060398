//! The outer alignment orchestrator.
//!
//! `IterWalk` drives a chain of (imager, motor) pairs to their goal pixels in
//! beam order. Each motor primarily moves the centroid on its own imager but
//! drags the others parasitically, so the loop keeps revisiting pairs until a
//! full pass finds every one inside tolerance. Along the way it maintains a
//! per-pair linear model whose slope seeds the next walk, inflates goals to
//! exploit the cross-coupling (overshoot), loosens tolerances while far from
//! the goal (adaptive tolerance), and hands filter starvation to a recovery
//! plan.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use beamwalk_traits::InsertState;

use crate::beamline::Beamline;
use crate::error::{AlignError, BuildError, Result};
use crate::filters::Filters;
use crate::fit::LinearFit;
use crate::measure::{DelaySchedule, measure_average};
use crate::recovery::{RecoveryContext, RecoveryPlan};
use crate::stream::{SourceRef, StartDocument};
use crate::walk::{WalkCfg, walk_to_pixel};

/// Imagers get this long to reach a commanded insertion state.
const IMAGER_PREP_TIMEOUT: Duration = Duration::from_secs(15);

/// Step budget handed to every inner walk.
const WALK_STEP_BUDGET: usize = 10;

/// A per-pair argument: one value broadcast to every pair, or one entry per
/// pair. A one-element list broadcasts like a scalar.
#[derive(Debug, Clone)]
pub enum ParamList<T> {
    Single(T),
    PerPair(Vec<T>),
}

impl<T: Clone> ParamList<T> {
    fn broadcast(self, num: usize, name: &'static str) -> std::result::Result<Vec<T>, BuildError> {
        match self {
            ParamList::Single(v) => Ok(vec![v; num]),
            ParamList::PerPair(v) if v.len() == num => Ok(v),
            ParamList::PerPair(v) if v.len() == 1 => Ok(vec![v[0].clone(); num]),
            ParamList::PerPair(v) => Err(BuildError::LengthMismatch {
                name,
                got: v.len(),
                expected: num,
            }),
        }
    }
}

impl<T> From<T> for ParamList<T> {
    fn from(v: T) -> Self {
        ParamList::Single(v)
    }
}

impl<T> From<Vec<T>> for ParamList<T> {
    fn from(v: Vec<T>) -> Self {
        ParamList::PerPair(v)
    }
}

/// Listified, validated parameters of one alignment run.
#[derive(Debug)]
pub struct IterWalkConfig {
    pub goals: Vec<f64>,
    pub starts: Vec<Option<f64>>,
    pub first_steps: Vec<f64>,
    pub gradients: Vec<Option<f64>>,
    pub detector_fields: Vec<String>,
    pub motor_fields: Vec<String>,
    pub tolerances: Vec<f64>,
    pub averages: Vec<usize>,
    pub filters: Vec<Filters>,
    pub tol_scaling: Vec<Option<f64>>,
    pub system: Vec<SourceRef>,
    pub overshoot: f64,
    pub max_walks: Option<usize>,
    pub timeout: Option<Duration>,
    pub min_valid: usize,
}

// Type-state markers for the builder.
pub struct Missing;
pub struct Set;

/// Builder for [`IterWalkConfig`]. Goals are the one required argument;
/// everything else defaults and broadcasts.
pub struct IterWalkBuilder<G> {
    goals: Option<ParamList<f64>>,
    starts: Option<ParamList<f64>>,
    first_steps: ParamList<f64>,
    gradients: Option<ParamList<f64>>,
    detector_fields: ParamList<String>,
    motor_fields: ParamList<String>,
    tolerances: ParamList<f64>,
    averages: ParamList<usize>,
    filters: Option<Vec<Filters>>,
    tol_scaling: Option<ParamList<f64>>,
    system: Vec<SourceRef>,
    overshoot: f64,
    max_walks: Option<usize>,
    timeout: Option<Duration>,
    min_valid: usize,
    _g: PhantomData<G>,
}

impl Default for IterWalkBuilder<Missing> {
    fn default() -> Self {
        Self {
            goals: None,
            starts: None,
            first_steps: ParamList::Single(1.0),
            gradients: None,
            detector_fields: ParamList::Single("centroid_x".to_string()),
            motor_fields: ParamList::Single("pitch".to_string()),
            tolerances: ParamList::Single(20.0),
            averages: ParamList::Single(1),
            filters: None,
            tol_scaling: None,
            system: Vec::new(),
            overshoot: 0.0,
            max_walks: None,
            timeout: None,
            min_valid: 1,
            _g: PhantomData,
        }
    }
}

impl<G> IterWalkBuilder<G> {
    pub fn starts(mut self, starts: impl Into<ParamList<f64>>) -> Self {
        self.starts = Some(starts.into());
        self
    }

    pub fn first_steps(mut self, first_steps: impl Into<ParamList<f64>>) -> Self {
        self.first_steps = first_steps.into();
        self
    }

    pub fn gradients(mut self, gradients: impl Into<ParamList<f64>>) -> Self {
        self.gradients = Some(gradients.into());
        self
    }

    pub fn detector_fields(mut self, fields: impl Into<ParamList<String>>) -> Self {
        self.detector_fields = fields.into();
        self
    }

    pub fn motor_fields(mut self, fields: impl Into<ParamList<String>>) -> Self {
        self.motor_fields = fields.into();
        self
    }

    pub fn tolerances(mut self, tolerances: impl Into<ParamList<f64>>) -> Self {
        self.tolerances = tolerances.into();
        self
    }

    pub fn averages(mut self, averages: impl Into<ParamList<usize>>) -> Self {
        self.averages = averages.into();
        self
    }

    /// Per-pair filter sets; must supply one per pair.
    pub fn filters(mut self, filters: Vec<Filters>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn tol_scaling(mut self, scaling: impl Into<ParamList<f64>>) -> Self {
        self.tol_scaling = Some(scaling.into());
        self
    }

    /// Extra readables recorded with every measurement. Entries matching the
    /// active pair's own devices are elided per measurement.
    pub fn system(mut self, system: Vec<SourceRef>) -> Self {
        self.system = system;
        self
    }

    pub fn overshoot(mut self, overshoot: f64) -> Self {
        self.overshoot = overshoot;
        self
    }

    pub fn max_walks(mut self, max_walks: usize) -> Self {
        self.max_walks = Some(max_walks);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn min_valid(mut self, min_valid: usize) -> Self {
        self.min_valid = min_valid;
        self
    }

    /// Fallible build available in any type-state; `num` is the pair count to
    /// broadcast against. No device is touched here.
    pub fn try_build(self, num: usize) -> Result<IterWalkConfig> {
        if num == 0 {
            return Err(BuildError::InvalidConfig("at least one pair is required").into());
        }
        let goals = self
            .goals
            .ok_or(BuildError::MissingGoals)?
            .broadcast(num, "goals")?;
        let starts = match self.starts {
            Some(s) => s.broadcast(num, "starts")?.into_iter().map(Some).collect(),
            None => vec![None; num],
        };
        let first_steps = self.first_steps.broadcast(num, "first_steps")?;
        let gradients = match self.gradients {
            Some(g) => g
                .broadcast(num, "gradients")?
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None; num],
        };
        let detector_fields = self.detector_fields.broadcast(num, "detector_fields")?;
        let motor_fields = self.motor_fields.broadcast(num, "motor_fields")?;
        let tolerances = self.tolerances.broadcast(num, "tolerances")?;
        let averages = self.averages.broadcast(num, "averages")?;
        let tol_scaling = match self.tol_scaling {
            Some(s) => s
                .broadcast(num, "tol_scaling")?
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None; num],
        };
        let filters = match self.filters {
            Some(f) => {
                if f.len() != num {
                    return Err(BuildError::LengthMismatch {
                        name: "filters",
                        got: f.len(),
                        expected: num,
                    }
                    .into());
                }
                f
            }
            None => (0..num).map(|_| Filters::new()).collect(),
        };

        if tolerances.iter().any(|t| *t <= 0.0) {
            return Err(BuildError::InvalidConfig("tolerances must be > 0").into());
        }
        if averages.iter().any(|a| *a == 0) {
            return Err(BuildError::InvalidConfig("averages must be >= 1").into());
        }
        if self.overshoot < -1.0 {
            return Err(BuildError::InvalidConfig("overshoot must be >= -1").into());
        }
        if tol_scaling.iter().flatten().any(|k| *k <= 0.0) {
            return Err(BuildError::InvalidConfig("tol_scaling must be > 0").into());
        }
        if self.min_valid == 0 {
            return Err(BuildError::InvalidConfig("min_valid must be >= 1").into());
        }

        Ok(IterWalkConfig {
            goals,
            starts,
            first_steps,
            gradients,
            detector_fields,
            motor_fields,
            tolerances,
            averages,
            filters,
            tol_scaling,
            system: self.system,
            overshoot: self.overshoot,
            max_walks: self.max_walks,
            timeout: self.timeout,
            min_valid: self.min_valid,
        })
    }
}

impl IterWalkBuilder<Missing> {
    pub fn goals(self, goals: impl Into<ParamList<f64>>) -> IterWalkBuilder<Set> {
        IterWalkBuilder {
            goals: Some(goals.into()),
            starts: self.starts,
            first_steps: self.first_steps,
            gradients: self.gradients,
            detector_fields: self.detector_fields,
            motor_fields: self.motor_fields,
            tolerances: self.tolerances,
            averages: self.averages,
            filters: self.filters,
            tol_scaling: self.tol_scaling,
            system: self.system,
            overshoot: self.overshoot,
            max_walks: self.max_walks,
            timeout: self.timeout,
            min_valid: self.min_valid,
            _g: PhantomData,
        }
    }
}

impl IterWalkBuilder<Set> {
    /// Validate and build; only available once goals are set.
    pub fn build(self, num: usize) -> Result<IterWalkConfig> {
        self.try_build(num)
    }
}

/// Live state of one (imager, motor) pair during a run.
#[derive(Debug)]
pub struct PairState {
    pub goal: f64,
    pub tolerance: f64,
    pub first_step: f64,
    pub gradient: Option<f64>,
    pub start: Option<f64>,
    pub tol_scaling: Option<f64>,
    pub selected_tolerance: f64,
    pub finished: bool,
    pub last_centroid: Option<f64>,
    pub last_position: Option<f64>,
    pub model: Option<LinearFit>,
}

impl PairState {
    fn from_config(cfg: &IterWalkConfig, i: usize) -> Self {
        Self {
            goal: cfg.goals[i],
            tolerance: cfg.tolerances[i],
            first_step: cfg.first_steps[i],
            gradient: cfg.gradients[i],
            start: cfg.starts[i],
            tol_scaling: cfg.tol_scaling[i],
            selected_tolerance: cfg.tolerances[i],
            finished: false,
            last_centroid: None,
            last_position: None,
            model: None,
        }
    }
}

/// Loosen the walk tolerance while the beam is far out, never below the
/// configured floor. No scaling constant means the fixed tolerance.
pub fn adaptive_tolerance(
    current: f64,
    goal: f64,
    tolerance: f64,
    scaling: Option<f64>,
) -> f64 {
    match scaling {
        None => tolerance,
        Some(k) => ((current - goal).abs() / k).max(tolerance),
    }
}

/// Move the imagers into measuring shape for pair `n`: retract everything
/// upstream (it blocks the beam), insert pair `n`, and pre-insert the tail
/// without waiting on it.
pub fn prep_imagers(
    bl: &mut Beamline,
    n: usize,
    prev_out: bool,
    tail_in: bool,
    timeout: Duration,
) -> Result<()> {
    let group = bl.new_group();
    for i in 0..bl.num_pairs() {
        if i < n {
            if prev_out {
                bl.set_imager(i, InsertState::Out, Some(group))?;
            }
        } else if i == n {
            bl.set_imager(i, InsertState::In, Some(group))?;
        } else if tail_in {
            bl.set_imager_detached(i, InsertState::In)?;
        }
    }
    bl.wait_group(group, Some(timeout))
}

enum PairOutcome {
    /// Finished without touching the motor.
    AlreadyAligned,
    /// Finished after a walk.
    Walked,
}

pub struct IterWalk {
    cfg: IterWalkConfig,
    pairs: Vec<PairState>,
    mirror_walks: usize,
    imager_cycles: usize,
    recoveries: usize,
}

impl IterWalk {
    pub fn builder() -> IterWalkBuilder<Missing> {
        IterWalkBuilder::default()
    }

    pub fn new(cfg: IterWalkConfig) -> Self {
        Self {
            cfg,
            pairs: Vec::new(),
            mirror_walks: 0,
            imager_cycles: 0,
            recoveries: 0,
        }
    }

    /// Per-pair states of the most recent run.
    pub fn pairs(&self) -> &[PairState] {
        &self.pairs
    }

    pub fn finished(&self) -> Vec<bool> {
        self.pairs.iter().map(|p| p.finished).collect()
    }

    pub fn all_finished(&self) -> bool {
        !self.pairs.is_empty() && self.pairs.iter().all(|p| p.finished)
    }

    /// (walks, imager cycles, recoveries) performed by the last run.
    pub fn counters(&self) -> (usize, usize, usize) {
        (self.mirror_walks, self.imager_cycles, self.recoveries)
    }

    /// Run without a recovery plan; filter starvation is fatal.
    pub fn run(&mut self, bl: &mut Beamline) -> Result<()> {
        self.run_inner(bl, None)
    }

    /// Run with a recovery plan to divert to on filter starvation.
    pub fn run_with_recovery(
        &mut self,
        bl: &mut Beamline,
        recovery: &mut dyn RecoveryPlan,
    ) -> Result<()> {
        self.run_inner(bl, Some(recovery))
    }

    fn run_inner(
        &mut self,
        bl: &mut Beamline,
        mut recovery: Option<&mut dyn RecoveryPlan>,
    ) -> Result<()> {
        let num = self.cfg.goals.len();
        if num != bl.num_pairs() {
            return Err(BuildError::LengthMismatch {
                name: "pairs",
                got: bl.num_pairs(),
                expected: num,
            }
            .into());
        }
        self.pairs = (0..num)
            .map(|i| PairState::from_config(&self.cfg, i))
            .collect();
        self.mirror_walks = 0;
        self.imager_cycles = 0;
        self.recoveries = 0;

        let clock = Arc::clone(bl.clock());
        let epoch = clock.now();

        bl.emit_start(&StartDocument {
            detectors: (0..num).map(|i| bl.imager_name(i).to_string()).collect(),
            mirrors: (0..num).map(|i| bl.motor_name(i).to_string()).collect(),
            goals: self.cfg.goals.clone(),
            plan_args: format!("{:?}", self.cfg),
        });

        // Bring the optics to a known pose before sensing begins; one group,
        // one wait, so the mirrors move together.
        let group = bl.new_group();
        let mut moving_to_nominal = false;
        for i in 0..num {
            if let Some(nominal) = bl.motor_nominal(i) {
                bl.set_motor(i, nominal, Some(group))?;
                moving_to_nominal = true;
            }
        }
        if moving_to_nominal {
            bl.wait_group(group, None)?;
        }

        let mut cycles = 0usize;
        'outer: loop {
            let mut index = 0usize;
            while index < num {
                if let Some(budget) = self.cfg.timeout {
                    let elapsed = clock.secs_since(epoch);
                    if elapsed > budget.as_secs_f64() {
                        return Err(AlignError::GlobalTimeout { elapsed_s: elapsed }.into());
                    }
                }

                debug!(index, "putting imager in");
                prep_imagers(bl, index, true, true, IMAGER_PREP_TIMEOUT)?;
                self.imager_cycles += 1;

                // Give higher-level machinery a chance to suspend or bail.
                bl.checkpoint()?;

                let full_system: Vec<SourceRef> = self
                    .cfg
                    .system
                    .iter()
                    .copied()
                    .filter(|s| {
                        *s != SourceRef::Imager(index) && *s != SourceRef::Motor(index)
                    })
                    .collect();

                let original_position = bl.motor_position(index);
                let mut pre_walk = true;

                match self.align_pair(bl, index, &full_system, cycles, &mut pre_walk) {
                    Ok(_) => {
                        if self.pairs.iter().all(|p| p.finished) {
                            debug!("beam aligned on all imagers");
                            break 'outer;
                        }
                        index += 1;
                    }
                    Err(err) => {
                        if !matches!(
                            err.downcast_ref::<AlignError>(),
                            Some(AlignError::FilterCount { .. })
                        ) {
                            return Err(err);
                        }
                        let Some(plan) = recovery.as_deref_mut() else {
                            error!("no recovery plan, not attempting to recover");
                            return Err(err);
                        };
                        if pre_walk {
                            // Remember somewhere safe to leave the motor if
                            // the plan cannot help either.
                            let fallback =
                                bl.motor_nominal(index).unwrap_or(original_position);
                            let ctx = self.recovery_context(index);
                            let ok = plan.attempt(bl, &ctx)?;
                            for p in &mut self.pairs {
                                p.finished = false;
                            }
                            self.recoveries += 1;
                            if !ok {
                                info!(
                                    "recovery failed, using the fallback position and \
                                     moving to the next pair"
                                );
                                bl.set_motor(index, fallback, None)?;
                                index += 1;
                            }
                        } else {
                            // Starved mid-walk: the plan will not help, the
                            // step parameters were probably too big. Undo and
                            // try the opposite direction, smaller.
                            info!("bad state reached during the walk, undoing it");
                            bl.set_motor(index, original_position, None)?;
                            for p in &mut self.pairs {
                                p.finished = false;
                            }
                            info!("lowering initial step parameters");
                            let pair = &mut self.pairs[index];
                            if let Some(g) = pair.gradient {
                                pair.gradient = Some(g * 2.0);
                            }
                            pair.first_step /= -2.0;
                        }
                    }
                }
            }

            if self.pairs.iter().all(|p| p.finished) {
                break;
            }
            cycles += 1;
            if let Some(max) = self.cfg.max_walks
                && cycles >= max
            {
                warn!(cycles, "outer loop budget exhausted before convergence");
                break;
            }
        }

        let positions: Vec<f64> = (0..num).map(|i| bl.motor_position(i)).collect();
        let aligned: Vec<f64> = self
            .pairs
            .iter()
            .map(|p| p.last_centroid.unwrap_or(f64::NAN))
            .collect();
        let deltas: Vec<f64> = aligned
            .iter()
            .zip(self.cfg.goals.iter())
            .map(|(a, g)| a - g)
            .collect();
        info!(
            elapsed_s = clock.secs_since(epoch),
            walks = self.mirror_walks,
            imager_cycles = self.imager_cycles,
            recoveries = self.recoveries,
            ?aligned,
            goals = ?self.cfg.goals,
            ?deltas,
            ?positions,
            "alignment finished"
        );
        Ok(())
    }

    fn align_pair(
        &mut self,
        bl: &mut Beamline,
        index: usize,
        full_system: &[SourceRef],
        cycles: usize,
        pre_walk: &mut bool,
    ) -> Result<PairOutcome> {
        let mut sources = vec![SourceRef::Imager(index), SourceRef::Motor(index)];
        sources.extend_from_slice(full_system);
        let det_field = self.cfg.detector_fields[index].clone();
        let mot_field = self.cfg.motor_fields[index].clone();
        let fields = [det_field.as_str(), mot_field.as_str()];

        debug!(index, "pre-walk measurement");
        let avgs = measure_average(
            bl,
            &sources,
            &fields,
            self.cfg.averages[index],
            &DelaySchedule::None,
            &self.cfg.filters[index],
            self.cfg.min_valid,
        )?;
        let center = avgs[0];
        debug!(center, "received centroid");

        let (goal_true, tolerance, tol_scaling, gradient, first_step, start) = {
            let p = &self.pairs[index];
            (
                p.goal,
                p.tolerance,
                p.tol_scaling,
                p.gradient,
                p.first_step,
                p.start,
            )
        };
        {
            let p = &mut self.pairs[index];
            p.last_centroid = Some(center);
            p.last_position = Some(bl.motor_position(index));
        }

        if (center - goal_true).abs() < tolerance {
            info!(
                imager = bl.imager_name(index),
                "beam was aligned without a move"
            );
            self.pairs[index].finished = true;
            return Ok(PairOutcome::AlreadyAligned);
        }
        // One out-of-tolerance reading discredits every earlier pass.
        debug!("resetting alignment flags before the move");
        for p in &mut self.pairs {
            p.finished = false;
        }

        // Deliberate target inflation on downstream pairs only; the true
        // goal still decides convergence next time around.
        let goal = if index == 0 {
            goal_true
        } else {
            (goal_true - center) * (1.0 + self.cfg.overshoot) + center
        };
        let selected_tol = adaptive_tolerance(center, goal_true, tolerance, tol_scaling);
        self.pairs[index].selected_tolerance = selected_tol;

        info!(
            pixels = (center - goal).abs(),
            imager = bl.imager_name(index),
            mirror = bl.motor_name(index),
            tolerance = selected_tol,
            "starting walk"
        );
        *pre_walk = false;

        let wcfg = WalkCfg {
            target: goal,
            start: if cycles == 0 { start } else { None },
            gradient,
            first_step,
            tolerance: selected_tol,
            average: self.cfg.averages[index],
            delay: DelaySchedule::None,
            max_steps: Some(WALK_STEP_BUDGET),
            detector_field: det_field,
            motor_field: mot_field,
            min_valid: self.cfg.min_valid,
        };
        let (center, model) = walk_to_pixel(
            bl,
            index,
            index,
            full_system,
            &self.cfg.filters[index],
            &wcfg,
        )?;
        self.mirror_walks += 1;

        let position = bl.motor_position(index);
        {
            let p = &mut self.pairs[index];
            p.last_centroid = Some(center);
            p.last_position = Some(position);
            match model.result() {
                Some(fit) => {
                    debug!(
                        slope = fit.slope,
                        intercept = fit.intercept,
                        "gradient refreshed from the walk fit"
                    );
                    p.gradient = Some(fit.slope);
                }
                None => warn!("no usable gradient came out of the walk fit"),
            }
            p.model = Some(model);
        }

        if (center - goal).abs() > selected_tol {
            error!("walk failed to reach the goal");
            return Err(AlignError::WalkFailed {
                index,
                centroid: center,
                goal,
                tolerance: selected_tol,
                position,
            }
            .into());
        }

        self.pairs[index].finished = true;
        Ok(PairOutcome::Walked)
    }

    fn recovery_context(&self, index: usize) -> RecoveryContext {
        RecoveryContext {
            index,
            goals: self.pairs.iter().map(|p| p.goal).collect(),
            starts: self.pairs.iter().map(|p| p.start).collect(),
            first_steps: self.pairs.iter().map(|p| p.first_step).collect(),
            gradients: self.pairs.iter().map(|p| p.gradient).collect(),
            detector_fields: self.cfg.detector_fields.clone(),
            motor_fields: self.cfg.motor_fields.clone(),
            tolerances: self.pairs.iter().map(|p| p.tolerance).collect(),
            averages: self.cfg.averages.clone(),
            tol_scaling: self.pairs.iter().map(|p| p.tol_scaling).collect(),
            overshoot: self.cfg.overshoot,
            max_walks: self.cfg.max_walks,
            timeout: self.cfg.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_broadcast_to_every_pair() {
        let v = ParamList::Single(5.0).broadcast(3, "x").unwrap();
        assert_eq!(v, vec![5.0, 5.0, 5.0]);
        let v = ParamList::PerPair(vec![7.0]).broadcast(2, "x").unwrap();
        assert_eq!(v, vec![7.0, 7.0]);
    }

    #[test]
    fn wrong_length_lists_are_refused() {
        let err = ParamList::PerPair(vec![1.0, 2.0]).broadcast(3, "goals");
        assert!(matches!(
            err,
            Err(BuildError::LengthMismatch {
                name: "goals",
                got: 2,
                expected: 3
            })
        ));
    }

    #[test]
    fn adaptive_tolerance_never_undercuts_the_floor() {
        // No scaling: the fixed tolerance, always.
        assert_eq!(adaptive_tolerance(1000.0, 0.0, 5.0, None), 5.0);
        // Far out: slack proportional to the distance.
        assert_eq!(adaptive_tolerance(1000.0, 0.0, 5.0, Some(2.0)), 500.0);
        // Close in: clamped at the requested tolerance.
        assert_eq!(adaptive_tolerance(6.0, 0.0, 5.0, Some(2.0)), 5.0);
    }

    #[test]
    fn builder_requires_goals_for_try_build() {
        let err = IterWalk::builder().try_build(2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingGoals)
        ));
    }

    #[test]
    fn builder_validates_ranges() {
        let err = IterWalk::builder()
            .goals(vec![240.0, 240.0])
            .tolerances(0.0)
            .build(2)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidConfig(_))
        ));

        let err = IterWalk::builder()
            .goals(240.0)
            .overshoot(-1.5)
            .build(1)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn builder_defaults_match_the_classic_signature() {
        let cfg = IterWalk::builder().goals(vec![100.0, 200.0]).build(2).unwrap();
        assert_eq!(cfg.first_steps, vec![1.0, 1.0]);
        assert_eq!(cfg.tolerances, vec![20.0, 20.0]);
        assert_eq!(cfg.averages, vec![1, 1]);
        assert_eq!(cfg.detector_fields[0], "centroid_x");
        assert_eq!(cfg.motor_fields[1], "pitch");
        assert_eq!(cfg.overshoot, 0.0);
        assert_eq!(cfg.gradients, vec![None, None]);
    }
}
