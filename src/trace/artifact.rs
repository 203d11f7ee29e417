//! On-disk trace format and offline analysis.
//!
//! An artifact is newline-delimited JSON: a header record, one record per
//! event in the order the recorder observed them, and a footer carrying the
//! event count. A missing footer means the session was never stopped.

use super::event::{EventKind, ExitOutcome, TraceEvent};
use crate::error::{Error, Result};
use crate::unit::{UnitId, UnitKind};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

pub const FORMAT: &str = "fanjoin-trace";
pub const VERSION: u32 = 1;

/// First record of every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub format: String,
    pub version: u32,
    pub started_unix_ms: u64,
}

impl Header {
    pub(crate) fn new(started_unix_ms: u64) -> Self {
        Self {
            format: FORMAT.to_string(),
            version: VERSION,
            started_unix_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Footer {
    end: bool,
    events: u64,
}

pub(crate) fn write_header<W: Write>(out: &mut W, header: &Header) -> Result<()> {
    serde_json::to_writer(&mut *out, header)?;
    out.write_all(b"\n")?;
    Ok(())
}

pub(crate) fn write_event<W: Write>(out: &mut W, event: &TraceEvent) -> Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    Ok(())
}

pub(crate) fn write_footer<W: Write>(out: &mut W, events: u64) -> Result<()> {
    serde_json::to_writer(&mut *out, &Footer { end: true, events })?;
    out.write_all(b"\n")?;
    Ok(())
}

/// A fully read, validated artifact.
#[derive(Debug, Clone)]
pub struct TraceLog {
    pub header: Header,
    pub events: Vec<TraceEvent>,
}

/// Reopen an artifact written by a stopped session.
pub fn read_artifact(path: impl AsRef<Path>) -> Result<TraceLog> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header_line = lines
        .next()
        .ok_or_else(|| Error::trace(format!("{}: empty artifact", path.display())))??;
    let header: Header = serde_json::from_str(&header_line)?;
    if header.format != FORMAT {
        return Err(Error::trace(format!(
            "{}: unknown format {:?}",
            path.display(),
            header.format
        )));
    }
    if header.version != VERSION {
        return Err(Error::trace(format!(
            "{}: unsupported version {}",
            path.display(),
            header.version
        )));
    }

    let mut events = Vec::new();
    let mut footer: Option<Footer> = None;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if footer.is_some() {
            return Err(Error::trace(format!("{}: data after footer", path.display())));
        }
        let value: serde_json::Value = serde_json::from_str(&line)?;
        if value.get("end").is_some() {
            footer = Some(serde_json::from_value(value)?);
        } else {
            events.push(serde_json::from_value(value)?);
        }
    }

    let footer = footer.ok_or_else(|| {
        Error::trace(format!(
            "{}: missing footer, session was not stopped",
            path.display()
        ))
    })?;
    if !footer.end || footer.events != events.len() as u64 {
        return Err(Error::trace(format!(
            "{}: footer counts {} events, found {}",
            path.display(),
            footer.events,
            events.len()
        )));
    }

    Ok(TraceLog { header, events })
}

/// Everything recorded about one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTimeline {
    pub kind: UnitKind,
    pub events: u64,
    pub preempts: u64,
    pub first_ns: u64,
    pub last_ns: u64,
    pub outcome: Option<ExitOutcome>,
}

/// Time spent between `block` and the matching `unblock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParkStats {
    pub count: u64,
    pub mean_ns: u64,
    pub p50_ns: u64,
    pub max_ns: u64,
}

#[derive(Debug, Clone)]
pub struct TraceSummary {
    pub total_events: u64,
    pub span_ns: u64,
    pub by_kind: BTreeMap<EventKind, u64>,
    pub units: BTreeMap<UnitId, UnitTimeline>,
    pub workers: BTreeSet<usize>,
    pub parked: Option<ParkStats>,
}

impl TraceSummary {
    pub fn count(&self, kind: EventKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

impl TraceLog {
    pub fn summary(&self) -> TraceSummary {
        let mut by_kind = BTreeMap::new();
        let mut units: BTreeMap<UnitId, UnitTimeline> = BTreeMap::new();
        let mut workers = BTreeSet::new();
        let mut open_blocks: HashMap<UnitId, u64> = HashMap::new();
        let mut park_hist = Histogram::<u64>::new(3).ok();
        let mut first = u64::MAX;
        let mut last = 0;

        for event in &self.events {
            *by_kind.entry(event.kind).or_insert(0) += 1;
            first = first.min(event.ts_ns);
            last = last.max(event.ts_ns);
            if let Some(worker) = event.worker {
                workers.insert(worker);
            }

            let timeline = units.entry(event.unit).or_insert(UnitTimeline {
                kind: event.unit_kind,
                events: 0,
                preempts: 0,
                first_ns: event.ts_ns,
                last_ns: event.ts_ns,
                outcome: None,
            });
            timeline.events += 1;
            timeline.first_ns = timeline.first_ns.min(event.ts_ns);
            timeline.last_ns = timeline.last_ns.max(event.ts_ns);

            match event.kind {
                EventKind::Preempt => timeline.preempts += 1,
                EventKind::Exit => timeline.outcome = event.outcome,
                EventKind::Block => {
                    open_blocks.insert(event.unit, event.ts_ns);
                }
                EventKind::Unblock => {
                    if let (Some(start), Some(hist)) =
                        (open_blocks.remove(&event.unit), park_hist.as_mut())
                    {
                        let _ = hist.record(event.ts_ns.saturating_sub(start));
                    }
                }
                EventKind::Spawn => {}
            }
        }

        let parked = park_hist.filter(|h| !h.is_empty()).map(|h| ParkStats {
            count: h.len(),
            mean_ns: h.mean() as u64,
            p50_ns: h.value_at_quantile(0.5),
            max_ns: h.max(),
        });

        TraceSummary {
            total_events: self.events.len() as u64,
            span_ns: if self.events.is_empty() { 0 } else { last - first },
            by_kind,
            units,
            workers,
            parked,
        }
    }
}

impl fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Trace Summary ===")?;
        writeln!(f, "Events: {}", self.total_events)?;
        writeln!(f, "Span: {:.2}ms", self.span_ns as f64 / 1_000_000.0)?;
        writeln!(f, "Workers seen: {}", self.workers.len())?;
        for kind in EventKind::ALL {
            writeln!(f, "  {:<8} {}", kind.as_str(), self.count(kind))?;
        }

        if let Some(parked) = &self.parked {
            writeln!(f, "\nParked:")?;
            writeln!(f, "  Count: {}", parked.count)?;
            writeln!(f, "  Mean: {:.2}ms", parked.mean_ns as f64 / 1_000_000.0)?;
            writeln!(f, "  P50: {:.2}ms", parked.p50_ns as f64 / 1_000_000.0)?;
            writeln!(f, "  Max: {:.2}ms", parked.max_ns as f64 / 1_000_000.0)?;
        }

        writeln!(f, "\nUnits:")?;
        for (id, unit) in &self.units {
            let outcome = match unit.outcome {
                Some(ExitOutcome::Ok) => "ok",
                Some(ExitOutcome::Error) => "error",
                Some(ExitOutcome::Panic) => "panic",
                None => "-",
            };
            writeln!(
                f,
                "  {:>4} {:<8} events={:<4} preempts={:<4} lifetime={:.2}ms exit={}",
                id.to_string(),
                unit.kind.to_string(),
                unit.events,
                unit.preempts,
                (unit.last_ns - unit.first_ns) as f64 / 1_000_000.0,
                outcome
            )?;
        }
        write!(f, "=====================")
    }
}
