//! Scheduler trace recorder.
//!
//! A recorder owns at most one active session. While active, events from any
//! thread are appended to an unbounded channel without touching the file; the
//! whole buffer is written out when the session stops.

use super::artifact::{write_event, write_footer, write_header, Header};
use super::event::{EventKind, ExitOutcome, TraceEvent};
use crate::error::{Error, Result};
use crate::executor::current_worker;
use crate::unit::{UnitId, UnitKind};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

struct ActiveSession {
    id: u64,
    path: PathBuf,
    out: BufWriter<File>,
    started: Instant,
    tx: Sender<TraceEvent>,
    rx: Receiver<TraceEvent>,
}

impl ActiveSession {
    fn open(id: u64, path: PathBuf) -> Result<Self> {
        let file = File::create(&path).map_err(|source| Error::Artifact {
            path: path.clone(),
            source,
        })?;
        let mut out = BufWriter::new(file);

        let started_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        write_header(&mut out, &Header::new(started_unix_ms))?;
        out.flush().map_err(|source| Error::Artifact {
            path: path.clone(),
            source,
        })?;

        let (tx, rx) = unbounded();
        Ok(Self {
            id,
            path,
            out,
            started: Instant::now(),
            tx,
            rx,
        })
    }

    fn finish(self) -> Result<SessionStats> {
        let ActiveSession {
            id: _,
            path,
            mut out,
            started,
            tx,
            rx,
        } = self;
        drop(tx);

        let mut events = 0u64;
        for event in rx.try_iter() {
            write_event(&mut out, &event)?;
            events += 1;
        }
        write_footer(&mut out, events)?;

        let file = out.into_inner().map_err(|e| Error::Artifact {
            path: path.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|source| Error::Artifact {
            path: path.clone(),
            source,
        })?;

        Ok(SessionStats {
            path,
            events,
            duration: started.elapsed(),
        })
    }
}

/// What a stopped session wrote.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub path: PathBuf,
    pub events: u64,
    pub duration: Duration,
}

/// Records scheduling events into a trace artifact between `start` and `stop`.
pub struct TraceRecorder {
    active: AtomicBool,
    next_session: AtomicU64,
    session: RwLock<Option<ActiveSession>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
            session: RwLock::new(None),
        }
    }

    /// The process-wide recorder.
    pub fn global() -> Arc<TraceRecorder> {
        static GLOBAL: OnceLock<Arc<TraceRecorder>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(TraceRecorder::new())).clone()
    }

    /// Open `destination` (truncating it) and start buffering events.
    ///
    /// The returned guard stops the session when dropped, unwinding included.
    ///
    /// # Panics
    ///
    /// If a session is already active on this recorder.
    pub fn start(&self, destination: impl AsRef<Path>) -> Result<TraceGuard<'_>> {
        let path = destination.as_ref().to_path_buf();
        let mut session = self.session.write();
        if let Some(active) = session.as_ref() {
            let current = active.path.clone();
            drop(session);
            panic!(
                "trace session already active (writing to {}); stop it before starting another",
                current.display()
            );
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        *session = Some(ActiveSession::open(id, path.clone())?);
        self.active.store(true, Ordering::Release);
        info!(session = id, path = %path.display(), "trace session started");

        Ok(TraceGuard {
            recorder: self,
            session: id,
            armed: true,
        })
    }

    /// Flush buffered events, write the footer and close the artifact.
    ///
    /// Returns `Ok(None)` when no session was active.
    pub fn stop(&self) -> Result<Option<SessionStats>> {
        self.stop_matching(|_| true)
    }

    // Stops the active session only if it is the one `id` was issued for.
    fn stop_session(&self, id: u64) -> Result<Option<SessionStats>> {
        self.stop_matching(|session| session.id == id)
    }

    fn stop_matching(
        &self,
        matches: impl FnOnce(&ActiveSession) -> bool,
    ) -> Result<Option<SessionStats>> {
        let taken = {
            let mut session = self.session.write();
            if session.as_ref().is_some_and(matches) {
                self.active.store(false, Ordering::Release);
                session.take()
            } else {
                None
            }
        };

        let Some(session) = taken else {
            debug!("trace stop without a matching active session");
            return Ok(None);
        };

        let stats = session.finish()?;
        info!(
            path = %stats.path.display(),
            events = stats.events,
            duration_ms = stats.duration.as_millis() as u64,
            "trace session stopped"
        );
        Ok(Some(stats))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Events buffered and not yet written.
    pub fn buffered(&self) -> usize {
        self.session.read().as_ref().map_or(0, |s| s.rx.len())
    }

    pub fn record(&self, kind: EventKind, unit: UnitId, unit_kind: UnitKind) {
        self.emit(kind, unit, unit_kind, None);
    }

    pub fn record_exit(&self, unit: UnitId, unit_kind: UnitKind, outcome: ExitOutcome) {
        self.emit(EventKind::Exit, unit, unit_kind, Some(outcome));
    }

    fn emit(
        &self,
        kind: EventKind,
        unit: UnitId,
        unit_kind: UnitKind,
        outcome: Option<ExitOutcome>,
    ) {
        if !self.is_active() {
            return;
        }
        let session = self.session.read();
        if let Some(session) = session.as_ref() {
            let _ = session.tx.send(TraceEvent {
                ts_ns: session.started.elapsed().as_nanos() as u64,
                kind,
                unit,
                unit_kind,
                worker: current_worker(),
                outcome,
            });
        }
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Scope of an active session. Dropping it stops the session it was issued
/// for, and leaves any later session on the same recorder alone.
pub struct TraceGuard<'a> {
    recorder: &'a TraceRecorder,
    session: u64,
    armed: bool,
}

impl<'a> TraceGuard<'a> {
    /// Stop the session now and report what was written.
    pub fn finish(mut self) -> Result<SessionStats> {
        self.armed = false;
        self.recorder
            .stop_session(self.session)?
            .ok_or_else(|| Error::trace("session was already stopped"))
    }
}

impl<'a> Drop for TraceGuard<'a> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.recorder.stop_session(self.session) {
            error!(error = %e, "failed to finalize trace artifact");
        }
    }
}
