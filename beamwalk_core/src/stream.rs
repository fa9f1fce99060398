//! Command and document types exchanged with the run coordinator.
//!
//! The controller plans never touch device I/O directly; every action they
//! take is representable as a [`Command`], and the coordinator keeps a journal
//! of the commands it dispatched. Measurements are flattened into event
//! [`Document`]s keyed `<device>_<field>` and fanned out to subscribed
//! [`EventWatcher`]s.

use beamwalk_traits::InsertState;
use std::collections::BTreeMap;

/// One flattened event: document key -> scalar value.
pub type Document = BTreeMap<String, f64>;

/// Handle to a device owned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRef {
    Imager(usize),
    Motor(usize),
    Extra(usize),
}

/// Token tying a batch of scheduled actions to a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

/// Setpoint of a `Set` command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetPoint {
    Position(f64),
    Insertion(InsertState),
}

/// The coordinator's command vocabulary. Checkpoints mark rewind boundaries;
/// they are issued immediately before each pair's measurement and before each
/// walk step, never mid-step.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Trigger { source: SourceRef },
    Wait { group: GroupId },
    Read { source: SourceRef },
    Set {
        device: SourceRef,
        target: SetPoint,
        group: Option<GroupId>,
    },
    Save,
    Sleep { seconds: f64 },
    Checkpoint,
    Null,
}

/// Metadata emitted once at run entry; enough to reconstruct the run later.
#[derive(Debug, Clone, PartialEq)]
pub struct StartDocument {
    pub detectors: Vec<String>,
    pub mirrors: Vec<String>,
    pub goals: Vec<f64>,
    /// Rendered run parameters, for the log record.
    pub plan_args: String,
}

/// Subscriber to the run's document stream (progress tables, live fits, ...).
pub trait EventWatcher {
    fn start(&mut self, _doc: &StartDocument) {}

    fn event(&mut self, doc: &Document);
}

/// Prefix a field with its device name unless the field already carries it.
pub fn field_key(device: &str, field: &str) -> String {
    if field.contains(device) {
        field.to_string()
    } else {
        format!("{device}_{field}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_key_prepends_device_once() {
        assert_eq!(field_key("img1", "centroid_x"), "img1_centroid_x");
        assert_eq!(field_key("img1", "img1_centroid_x"), "img1_centroid_x");
    }

    #[test]
    fn source_refs_distinguish_kinds() {
        assert_ne!(SourceRef::Imager(0), SourceRef::Motor(0));
        assert_eq!(SourceRef::Extra(2), SourceRef::Extra(2));
    }
}
