//! Event sinks for hub activity.
//!
//! A [`Tracer`] records one line per event. The hub only ever calls it from
//! its own task, so the lines of a single hub come out in the order the
//! events happened.

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{debug, info};

pub trait Tracer: Send + Sync {
    /// Records `event` as one line. Several values go in together as
    /// `&format_args!(..)`.
    fn trace(&self, event: &dyn fmt::Display);
}

/// Returns a tracer that ignores every event.
pub fn off() -> Arc<dyn Tracer> {
    Arc::new(Off)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Off;

impl Tracer for Off {
    fn trace(&self, _event: &dyn fmt::Display) {}
}

/// Writes each event followed by a newline to the wrapped writer.
pub struct WriterTracer<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> WriterTracer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WriterTracer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Tracer for WriterTracer<W> {
    fn trace(&self, event: &dyn fmt::Display) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = writeln!(out, "{event}").and_then(|()| out.flush()) {
            debug!(?error, "failed to write trace event");
        }
    }
}

/// Forwards events to the `tracing` subscriber under the `room` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn trace(&self, event: &dyn fmt::Display) {
        info!(target: "room", "{event}");
    }
}

/// Keeps every event in memory so callers can inspect the sequence later.
#[derive(Debug, Default)]
pub struct MemoryTracer {
    lines: Mutex<Vec<String>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Tracer for MemoryTracer {
    fn trace(&self, event: &dyn fmt::Display) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.to_string());
    }
}
