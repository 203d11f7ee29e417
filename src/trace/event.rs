//! Scheduling events captured during a trace session.

use crate::unit::{UnitId, UnitKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Spawn,
    Block,
    Unblock,
    Preempt,
    Exit,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Spawn,
        EventKind::Block,
        EventKind::Unblock,
        EventKind::Preempt,
        EventKind::Exit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Spawn => "spawn",
            EventKind::Block => "block",
            EventKind::Unblock => "unblock",
            EventKind::Preempt => "preempt",
            EventKind::Exit => "exit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a unit's body ended, attached to `exit` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitOutcome {
    Ok,
    Error,
    Panic,
}

/// One recorded event. `ts_ns` is measured from session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts_ns: u64,
    pub kind: EventKind,
    pub unit: UnitId,
    pub unit_kind: UnitKind,
    /// Pool worker that observed the event; absent off-pool (e.g. the driver).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExitOutcome>,
}
