//! Event records published when the engine reports a trigger return.

use sd_core::{EventId, Real};

use crate::model::DynamicalSystem;

/// How a trigger function crossed zero.
///
/// The engine reports only that a sign change occurred, so every detected
/// event carries `AnySignChange` rather than a rising/falling classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTransition {
    AnySignChange,
}

/// A solver-detected event: which trigger fired and when.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub id: EventId,
    pub time: Real,
    pub transition: EventTransition,
}

/// Map the engine's per-trigger flags to event records at `time`.
pub(crate) fn collect_triggered<S: DynamicalSystem>(
    flags: &[bool],
    system: &S,
    time: Real,
) -> Vec<EventRecord> {
    flags
        .iter()
        .enumerate()
        .filter(|&(_, &fired)| fired)
        .map(|(index, _)| EventRecord {
            id: system.event_id(index),
            time,
            transition: EventTransition::AnySignChange,
        })
        .collect()
}
