//! Task execution infrastructure.
//!
//! Worker threads, the shared task queue, the timer that holds parked units,
//! and panic capture for unit bodies.

pub mod cpu_pool;
pub mod panic_handler;
pub mod task;
pub mod timer;
pub mod worker;

pub use cpu_pool::CpuPool;
pub use panic_handler::{PanicHandler, PanicInfo, PanicStrategy};
pub use timer::{Sleep, TimerHandle};
pub use worker::current_worker;
