pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::executor::PanicStrategy;
pub use crate::launcher::{TaskLauncher, Wave, WaveReport};
pub use crate::runtime::Runtime;
pub use crate::sync::CompletionBarrier;
pub use crate::trace::{EventKind, TraceRecorder};
pub use crate::unit::{UnitContext, UnitError, UnitId, UnitKind, UnitResult, WorkUnit};
