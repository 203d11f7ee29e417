//! Scheduler trace recording and offline inspection.
//!
//! [`TraceRecorder`] captures `spawn`, `block`, `unblock`, `preempt` and `exit`
//! events for every unit running while a session is active, and writes them
//! to an artifact that [`read_artifact`] can load back for analysis.

pub mod artifact;
pub mod event;
pub mod recorder;

pub use artifact::{read_artifact, ParkStats, TraceLog, TraceSummary, UnitTimeline};
pub use event::{EventKind, ExitOutcome, TraceEvent};
pub use recorder::{SessionStats, TraceGuard, TraceRecorder};
