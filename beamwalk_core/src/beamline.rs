//! The run coordinator.
//!
//! `Beamline` owns every device handle and is the single place where device
//! I/O happens. The controller plans (measure, walk, orchestrator) address
//! devices through [`SourceRef`]s and express every action as a coordinator
//! call; each call is recorded in a command journal that tests and callers
//! can inspect. Scheduled actions can be grouped under a token and awaited
//! with a single wait, which is how the nominal-position pre-move runs all
//! mirrors in parallel.
//!
//! Checkpoints are the rewind boundaries: an optional suspend hook is polled
//! there and holds the run between commands, and an abort hook turns into a
//! typed interrupt. Each motor has one logical writer at any instant;
//! readable sources may appear in several read sets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use beamwalk_traits::clock::{Clock, MonotonicClock};
use beamwalk_traits::{ImagerMotor, InsertState, PitchMotor, Readable, Status};

use crate::error::{AlignError, BuildError, Result};
use crate::stream::{
    Command, Document, EventWatcher, GroupId, SetPoint, SourceRef, StartDocument, field_key,
};

struct Pending {
    device: SourceRef,
    action: String,
    status: Box<dyn Status>,
}

pub struct Beamline {
    imagers: Vec<Box<dyn ImagerMotor>>,
    motors: Vec<Box<dyn PitchMotor>>,
    extras: Vec<Box<dyn Readable>>,
    clock: Arc<dyn Clock + Send + Sync>,
    suspend_check: Option<Box<dyn Fn() -> bool>>,
    abort_check: Option<Box<dyn Fn() -> bool>>,
    watchers: Vec<Box<dyn EventWatcher>>,
    journal: Vec<Command>,
    pending: HashMap<GroupId, Vec<Pending>>,
    next_group: u64,
}

impl core::fmt::Debug for Beamline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Beamline")
            .field("pairs", &self.imagers.len())
            .field("extras", &self.extras.len())
            .field("journal_len", &self.journal.len())
            .finish()
    }
}

impl Beamline {
    pub fn builder() -> BeamlineBuilder {
        BeamlineBuilder::default()
    }

    /// Number of (imager, motor) pairs on the line.
    pub fn num_pairs(&self) -> usize {
        self.imagers.len()
    }

    pub fn num_extras(&self) -> usize {
        self.extras.len()
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    pub fn source_name(&self, source: SourceRef) -> &str {
        match source {
            SourceRef::Imager(i) => self.imagers[i].name(),
            SourceRef::Motor(i) => self.motors[i].name(),
            SourceRef::Extra(i) => self.extras[i].name(),
        }
    }

    fn source_mut(&mut self, source: SourceRef) -> &mut dyn Readable {
        match source {
            SourceRef::Imager(i) => self.imagers[i].as_mut(),
            SourceRef::Motor(i) => self.motors[i].as_mut(),
            SourceRef::Extra(i) => self.extras[i].as_mut(),
        }
    }

    pub fn motor_name(&self, idx: usize) -> &str {
        self.motors[idx].name()
    }

    pub fn imager_name(&self, idx: usize) -> &str {
        self.imagers[idx].name()
    }

    pub fn motor_position(&self, idx: usize) -> f64 {
        self.motors[idx].position()
    }

    pub fn motor_nominal(&self, idx: usize) -> Option<f64> {
        self.motors[idx].nominal_position()
    }

    pub fn motor_limits(&self, idx: usize) -> (Option<f64>, Option<f64>) {
        (self.motors[idx].low_limit(), self.motors[idx].high_limit())
    }

    pub fn imager_state(&self, idx: usize) -> InsertState {
        self.imagers[idx].state()
    }

    /// Commands dispatched so far, oldest first.
    pub fn journal(&self) -> &[Command] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn new_group(&mut self) -> GroupId {
        self.next_group += 1;
        GroupId(self.next_group)
    }

    /// Schedule an absolute motor move. With a group the completion is
    /// deferred to [`wait_group`](Self::wait_group); without one the move is
    /// awaited before returning. Set failures are fatal motor faults.
    pub fn set_motor(&mut self, idx: usize, target: f64, group: Option<GroupId>) -> Result<()> {
        self.journal.push(Command::Set {
            device: SourceRef::Motor(idx),
            target: SetPoint::Position(target),
            group,
        });
        debug!(motor = self.motors[idx].name(), target, "motor set");
        let status = self.motors[idx].set(target).map_err(|e| {
            AlignError::MotorFault {
                motor: self.motors[idx].name().to_string(),
                reason: e.to_string(),
            }
        })?;
        self.finish_or_park(
            Pending {
                device: SourceRef::Motor(idx),
                action: format!("abs {target}"),
                status,
            },
            group,
            None,
        )
    }

    pub fn stop_motor(&mut self, idx: usize) -> Result<()> {
        self.motors[idx].stop().map_err(|e| {
            AlignError::MotorFault {
                motor: self.motors[idx].name().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Schedule an imager insertion-state transition.
    pub fn set_imager(
        &mut self,
        idx: usize,
        state: InsertState,
        group: Option<GroupId>,
    ) -> Result<()> {
        self.journal.push(Command::Set {
            device: SourceRef::Imager(idx),
            target: SetPoint::Insertion(state),
            group,
        });
        debug!(imager = self.imagers[idx].name(), %state, "imager set");
        let status = self.imagers[idx]
            .set_state(state)
            .map_err(|e| eyre::eyre!("imager {} refused {state}: {e}", self.imagers[idx].name()))?;
        self.finish_or_park(
            Pending {
                device: SourceRef::Imager(idx),
                action: state.to_string(),
                status,
            },
            group,
            None,
        )
    }

    /// Fire-and-forget insertion; the status is dropped unawaited. Used for
    /// tail imagers that only need to be in place by the time we get there.
    pub fn set_imager_detached(&mut self, idx: usize, state: InsertState) -> Result<()> {
        self.journal.push(Command::Set {
            device: SourceRef::Imager(idx),
            target: SetPoint::Insertion(state),
            group: None,
        });
        let _ = self.imagers[idx]
            .set_state(state)
            .map_err(|e| eyre::eyre!("imager {} refused {state}: {e}", self.imagers[idx].name()))?;
        Ok(())
    }

    fn finish_or_park(
        &mut self,
        pending: Pending,
        group: Option<GroupId>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        match group {
            Some(g) => {
                self.pending.entry(g).or_default().push(pending);
                Ok(())
            }
            None => self.await_one(pending, timeout),
        }
    }

    fn await_one(&self, mut pending: Pending, timeout: Option<Duration>) -> Result<()> {
        pending.status.wait(timeout).map_err(|e| {
            let timeout_s = timeout.map_or(0, |t| t.as_secs());
            match pending.device {
                SourceRef::Motor(i) => AlignError::MotorFault {
                    motor: self.motors[i].name().to_string(),
                    reason: e.to_string(),
                }
                .into(),
                SourceRef::Imager(i) => AlignError::InsertionTimeout {
                    imager: self.imagers[i].name().to_string(),
                    target: pending.action.clone(),
                    timeout_s,
                }
                .into(),
                SourceRef::Extra(i) => {
                    eyre::eyre!("wait on {} failed: {e}", self.extras[i].name())
                }
            }
        })
    }

    /// Await every status parked under `group`. Typed errors name the device
    /// that failed; an imager expiry is an insertion timeout, a motor expiry
    /// a motor fault.
    pub fn wait_group(&mut self, group: GroupId, timeout: Option<Duration>) -> Result<()> {
        self.journal.push(Command::Wait { group });
        let pendings = self.pending.remove(&group).unwrap_or_default();
        for mut p in pendings {
            p.status.wait(timeout).map_err(|e| -> eyre::Report {
                let timeout_s = timeout.map_or(0, |t| t.as_secs());
                match p.device {
                    SourceRef::Motor(i) => AlignError::MotorFault {
                        motor: self.motors[i].name().to_string(),
                        reason: e.to_string(),
                    }
                    .into(),
                    SourceRef::Imager(i) => AlignError::InsertionTimeout {
                        imager: self.imagers[i].name().to_string(),
                        target: p.action.clone(),
                        timeout_s,
                    }
                    .into(),
                    SourceRef::Extra(i) => {
                        eyre::eyre!("wait on {} failed: {e}", self.extras[i].name())
                    }
                }
            })?;
        }
        Ok(())
    }

    /// Trigger every source, await all triggers, then snapshot one combined
    /// document keyed `<device>_<field>`.
    pub fn trigger_and_read(&mut self, sources: &[SourceRef]) -> Result<Document> {
        let group = self.new_group();
        for &source in sources {
            self.journal.push(Command::Trigger { source });
            let name = self.source_name(source).to_string();
            let status = self
                .source_mut(source)
                .trigger()
                .map_err(|e| eyre::eyre!("trigger {name}: {e}"))?;
            self.pending.entry(group).or_default().push(Pending {
                device: source,
                action: "trigger".to_string(),
                status,
            });
        }
        self.wait_group(group, None)?;

        let mut doc = Document::new();
        for &source in sources {
            self.journal.push(Command::Read { source });
            let name = self.source_name(source).to_string();
            let readings = self
                .source_mut(source)
                .read()
                .map_err(|e| eyre::eyre!("read {name}: {e}"))?;
            for (field, reading) in readings {
                doc.insert(field_key(&name, &field), reading.value);
            }
        }
        Ok(doc)
    }

    /// Snapshot one source and pull a single field out of it. Recovery scans
    /// use this to watch their threshold signal.
    pub fn read_signal(&mut self, source: SourceRef, field: &str) -> Result<f64> {
        let doc = self.trigger_and_read(&[source])?;
        let name = self.source_name(source);
        let key = field_key(name, field);
        doc.get(&key)
            .or_else(|| doc.get(field))
            .copied()
            .ok_or_else(|| eyre::eyre!("{name} reported no field {field}"))
    }

    pub fn sleep(&mut self, d: Duration) {
        self.journal.push(Command::Sleep {
            seconds: d.as_secs_f64(),
        });
        self.clock.sleep(d);
    }

    /// Rewind boundary. Blocks while the suspend hook holds and surfaces an
    /// operator abort as a typed interrupt.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.journal.push(Command::Checkpoint);
        loop {
            if let Some(abort) = &self.abort_check
                && abort()
            {
                return Err(AlignError::Interrupted.into());
            }
            match &self.suspend_check {
                Some(hold) if hold() => {
                    trace!("suspended at checkpoint");
                    self.clock.sleep(Duration::from_millis(50));
                }
                _ => return Ok(()),
            }
        }
    }

    /// Emit one event document to the stream.
    pub fn save(&mut self, doc: &Document) {
        self.journal.push(Command::Save);
        trace!(?doc, "event");
        for w in &mut self.watchers {
            w.event(doc);
        }
    }

    pub fn emit_start(&mut self, start: &StartDocument) {
        info!(
            detectors = ?start.detectors,
            mirrors = ?start.mirrors,
            goals = ?start.goals,
            "run start"
        );
        for w in &mut self.watchers {
            w.start(start);
        }
    }
}

#[derive(Default)]
pub struct BeamlineBuilder {
    imagers: Vec<Box<dyn ImagerMotor>>,
    motors: Vec<Box<dyn PitchMotor>>,
    extras: Vec<Box<dyn Readable>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    suspend_check: Option<Box<dyn Fn() -> bool>>,
    abort_check: Option<Box<dyn Fn() -> bool>>,
    watchers: Vec<Box<dyn EventWatcher>>,
}

impl BeamlineBuilder {
    /// Register one aligned (imager, motor) pair; order is beam order.
    pub fn add_pair(
        mut self,
        imager: impl ImagerMotor + 'static,
        motor: impl PitchMotor + 'static,
    ) -> Self {
        self.imagers.push(Box::new(imager));
        self.motors.push(Box::new(motor));
        self
    }

    /// Extra readable recorded alongside every measurement.
    pub fn add_extra(mut self, source: impl Readable + 'static) -> Self {
        self.extras.push(Box::new(source));
        self
    }

    /// Provide a custom clock; defaults to the monotonic wall clock.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Hook polled at checkpoints; while it returns true the run holds.
    pub fn on_suspend<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.suspend_check = Some(Box::new(hook));
        self
    }

    /// Hook polled at checkpoints; returning true interrupts the run.
    pub fn on_abort<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.abort_check = Some(Box::new(hook));
        self
    }

    pub fn watch(mut self, watcher: Box<dyn EventWatcher>) -> Self {
        self.watchers.push(watcher);
        self
    }

    pub fn build(self) -> Result<Beamline> {
        if self.imagers.len() != self.motors.len() {
            return Err(BuildError::InvalidConfig("imager/motor counts differ").into());
        }
        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(b) => Arc::from(b),
            None => Arc::new(MonotonicClock::new()),
        };
        Ok(Beamline {
            imagers: self.imagers,
            motors: self.motors,
            extras: self.extras,
            clock,
            suspend_check: self.suspend_check,
            abort_check: self.abort_check,
            watchers: self.watchers,
            journal: Vec::new(),
            pending: HashMap::new(),
            next_group: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{TestImager, TestMotor};

    fn line() -> Beamline {
        Beamline::builder()
            .add_pair(TestImager::at("img1", 100.0), TestMotor::at("m1", 0.0))
            .build()
            .unwrap()
    }

    #[test]
    fn build_rejects_uneven_pairs() {
        let b = BeamlineBuilder {
            imagers: vec![Box::new(TestImager::at("img1", 0.0))],
            ..Default::default()
        };
        assert!(b.build().is_err());
    }

    #[test]
    fn set_motor_updates_position_and_journal() {
        let mut bl = line();
        bl.set_motor(0, 0.25, None).unwrap();
        assert_eq!(bl.motor_position(0), 0.25);
        assert!(matches!(
            bl.journal()[0],
            Command::Set {
                device: SourceRef::Motor(0),
                target: SetPoint::Position(t),
                ..
            } if t == 0.25
        ));
    }

    #[test]
    fn grouped_sets_wait_once() {
        let mut bl = line();
        let g = bl.new_group();
        bl.set_motor(0, 1.0, Some(g)).unwrap();
        bl.wait_group(g, None).unwrap();
        let waits = bl
            .journal()
            .iter()
            .filter(|c| matches!(c, Command::Wait { .. }))
            .count();
        assert_eq!(waits, 1);
    }

    #[test]
    fn trigger_and_read_prefixes_fields() {
        let mut bl = line();
        let doc = bl
            .trigger_and_read(&[SourceRef::Imager(0), SourceRef::Motor(0)])
            .unwrap();
        assert!(doc.contains_key("img1_centroid_x"));
        assert!(doc.contains_key("m1_pitch"));
    }

    #[test]
    fn abort_hook_interrupts_at_checkpoint() {
        let mut bl = Beamline::builder()
            .add_pair(TestImager::at("img1", 0.0), TestMotor::at("m1", 0.0))
            .on_abort(|| true)
            .build()
            .unwrap();
        let err = bl.checkpoint().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::Interrupted)
        ));
    }
}
