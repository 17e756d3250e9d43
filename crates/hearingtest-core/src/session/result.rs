//! Terminal session records and where they go

use crate::audio::routing::EarMode;
use crate::estimator::interpret::Interpretation;
use crate::estimator::ThresholdEstimate;
use crate::session::procedure::TestKind;
use crate::session::trial::Trial;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Everything one session produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub kind: TestKind,
    pub ear_mode: EarMode,
    /// Answered trials in presentation order
    pub trials: Vec<Trial>,
    pub estimate: ThresholdEstimate,
    pub interpretation: Option<Interpretation>,
    /// Inputs dropped as out of phase, of the wrong kind or malformed
    pub ignored_inputs: u32,
    /// Trials presented again on request
    pub replays: u32,
    /// False when the subject quit or input closed before the stopping rule
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Receiver of terminal session records
pub trait ResultSink {
    fn publish(&mut self, record: &SessionRecord) -> anyhow::Result<()>;
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<SessionRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }
}

impl ResultSink for MemorySink {
    fn publish(&mut self, record: &SessionRecord) -> anyhow::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Writes each record as JSON
pub struct JsonSink<W: Write> {
    writer: W,
    pretty: bool,
}

impl<W: Write> JsonSink<W> {
    /// One compact record per line
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pretty: false,
        }
    }

    /// Indented output
    pub fn pretty(writer: W) -> Self {
        Self {
            writer,
            pretty: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonSink<W> {
    fn publish(&mut self, record: &SessionRecord) -> anyhow::Result<()> {
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.writer, record)?;
        } else {
            serde_json::to_writer(&mut self.writer, record)?;
        }
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}
