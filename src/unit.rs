//! Work units: the opaque bodies a wave fans out, plus the context they run with.

use crate::executor::timer::TimerHandle;
use crate::trace::{EventKind, TraceRecorder};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Ordinal identifier of a unit within its wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<usize> for UnitId {
    fn from(id: usize) -> Self {
        UnitId(id)
    }
}

/// Classification used when tagging trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Compute,
    Blocking,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Compute => f.write_str("compute"),
            UnitKind::Blocking => f.write_str("blocking"),
        }
    }
}

/// Failure of a single unit's body. Never propagates to sibling units.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),
}

impl UnitError {
    pub fn failed<S: Into<String>>(msg: S) -> Self {
        UnitError::Failed(msg.into())
    }
}

pub type UnitResult = std::result::Result<(), UnitError>;

type Body = Box<dyn FnOnce(UnitContext) -> BoxFuture<'static, UnitResult> + Send>;

/// One concurrent task of a wave.
pub struct WorkUnit {
    id: UnitId,
    kind: UnitKind,
    body: Body,
}

impl WorkUnit {
    /// Build a unit from an async body.
    pub fn new<F, Fut>(id: usize, kind: UnitKind, body: F) -> Self
    where
        F: FnOnce(UnitContext) -> Fut + Send + 'static,
        Fut: Future<Output = UnitResult> + Send + 'static,
    {
        Self {
            id: UnitId(id),
            kind,
            body: Box::new(move |cx| body(cx).boxed()),
        }
    }

    /// Build a unit from a synchronous body. It runs on a worker without
    /// yielding, so it should not sleep.
    pub fn from_fn<F>(id: usize, kind: UnitKind, body: F) -> Self
    where
        F: FnOnce(&UnitContext) -> UnitResult + Send + 'static,
    {
        Self::new(id, kind, move |cx| async move { body(&cx) })
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub(crate) fn run(self, cx: UnitContext) -> BoxFuture<'static, UnitResult> {
        (self.body)(cx)
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Handle a running unit uses to reach the scheduler: preemption points,
/// parking, and trace recording.
pub struct UnitContext {
    id: UnitId,
    kind: UnitKind,
    preempt_every: u64,
    block_delay: Duration,
    timer: TimerHandle,
    recorder: Option<Arc<TraceRecorder>>,
}

impl UnitContext {
    pub(crate) fn new(
        id: UnitId,
        kind: UnitKind,
        preempt_every: u64,
        block_delay: Duration,
        timer: TimerHandle,
        recorder: Option<Arc<TraceRecorder>>,
    ) -> Self {
        Self {
            id,
            kind,
            preempt_every,
            block_delay,
            timer,
            recorder,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Iterations a compute-bound body should run between preemption points.
    pub fn preempt_every(&self) -> u64 {
        self.preempt_every
    }

    /// How long a blocking unit without an explicit delay stays parked.
    pub fn block_delay(&self) -> Duration {
        self.block_delay
    }

    /// Preemption point: hand the worker back to the pool queue once and
    /// resume when rescheduled.
    pub async fn preempt(&self) {
        self.record(EventKind::Preempt);
        YieldNow { yielded: false }.await
    }

    /// Park for `duration` without holding a worker thread.
    pub async fn park(&self, duration: Duration) {
        self.record(EventKind::Block);
        self.timer.sleep(duration).await;
        self.record(EventKind::Unblock);
    }

    fn record(&self, kind: EventKind) {
        if let Some(recorder) = &self.recorder {
            recorder.record(kind, self.id, self.kind);
        }
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("traced", &self.recorder.is_some())
            .finish()
    }
}

struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
