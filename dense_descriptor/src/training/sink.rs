//! Metrics sinks.
//!
//! The trainer reports named scalar series and display panels, keyed by
//! phase and step, to any number of sinks.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::display::DisplayPanel;
use crate::error::Result;
use crate::matching::KeypointMatch;

/// Phase a series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Training batches.
    Train,
    /// Validation batches.
    Validation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "Train"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

/// Destination of training metrics.
pub trait MetricsSink: Send {
    /// Record named scalars at `step`.
    fn add_scalars(&mut self, phase: Phase, scalars: &[(&str, f64)], step: usize) -> Result<()>;

    /// Record a display panel at `step`.
    fn add_panel(&mut self, phase: Phase, panel: &DisplayPanel, step: usize) -> Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Mirrors scalars to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn add_scalars(&mut self, phase: Phase, scalars: &[(&str, f64)], step: usize) -> Result<()> {
        let line = scalars
            .iter()
            .map(|(name, value)| format!("{}={:.6}", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        log::debug!("{} step={} {}", phase, step, line);
        Ok(())
    }

    fn add_panel(&mut self, phase: Phase, panel: &DisplayPanel, step: usize) -> Result<()> {
        log::debug!(
            "{} step={} panel {}/{} - {}: {} cross-checked matches",
            phase,
            step,
            panel.folder,
            panel.frame_names[0],
            panel.frame_names[1],
            panel.matches.len()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ScalarRecord<'a> {
    phase: Phase,
    step: usize,
    name: &'a str,
    value: f64,
}

#[derive(Debug, Serialize)]
struct PanelRecord<'a> {
    phase: Phase,
    step: usize,
    folder: &'a str,
    frame_names: &'a [String; 2],
    height: usize,
    width: usize,
    matches: &'a [KeypointMatch],
}

/// Appends JSON lines to `scalars.jsonl` and `panels.jsonl` in a directory.
///
/// Panels are recorded by provenance and matches; images stay in memory.
pub struct JsonLinesSink {
    scalars: BufWriter<File>,
    panels: BufWriter<File>,
    dir: PathBuf,
}

impl JsonLinesSink {
    /// File name of the scalar series.
    pub const SCALARS_FILE: &'static str = "scalars.jsonl";
    /// File name of the panel records.
    pub const PANELS_FILE: &'static str = "panels.jsonl";

    /// Open (or append to) the files in `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        let open = |name: &str| -> Result<BufWriter<File>> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))?;
            Ok(BufWriter::new(file))
        };
        Ok(Self {
            scalars: open(Self::SCALARS_FILE)?,
            panels: open(Self::PANELS_FILE)?,
            dir: dir.to_path_buf(),
        })
    }

    /// Directory the files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MetricsSink for JsonLinesSink {
    fn add_scalars(&mut self, phase: Phase, scalars: &[(&str, f64)], step: usize) -> Result<()> {
        for &(name, value) in scalars {
            let record = ScalarRecord {
                phase,
                step,
                name,
                value,
            };
            serde_json::to_writer(&mut self.scalars, &record)?;
            self.scalars.write_all(b"\n")?;
        }
        Ok(())
    }

    fn add_panel(&mut self, phase: Phase, panel: &DisplayPanel, step: usize) -> Result<()> {
        let record = PanelRecord {
            phase,
            step,
            folder: &panel.folder,
            frame_names: &panel.frame_names,
            height: panel.height,
            width: panel.width,
            matches: &panel.matches,
        };
        serde_json::to_writer(&mut self.panels, &record)?;
        self.panels.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.scalars.flush()?;
        self.panels.flush()?;
        Ok(())
    }
}

/// A scalar recorded by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarEntry {
    /// Phase of the series.
    pub phase: Phase,
    /// Series name.
    pub name: String,
    /// Step.
    pub step: usize,
    /// Value.
    pub value: f64,
}

#[derive(Debug, Default)]
struct MemoryRecords {
    scalars: Vec<ScalarEntry>,
    panels: Vec<(Phase, usize, DisplayPanel)>,
}

/// Keeps everything in memory; clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<MemoryRecords>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded scalars.
    pub fn scalars(&self) -> Vec<ScalarEntry> {
        self.records
            .lock()
            .map(|records| records.scalars.clone())
            .unwrap_or_default()
    }

    /// Values of one series, in recording order.
    pub fn series(&self, phase: Phase, name: &str) -> Vec<(usize, f64)> {
        self.scalars()
            .into_iter()
            .filter(|entry| entry.phase == phase && entry.name == name)
            .map(|entry| (entry.step, entry.value))
            .collect()
    }

    /// All recorded panels with their phase and step.
    pub fn panels(&self) -> Vec<(Phase, usize, DisplayPanel)> {
        self.records
            .lock()
            .map(|records| records.panels.clone())
            .unwrap_or_default()
    }
}

impl MetricsSink for MemorySink {
    fn add_scalars(&mut self, phase: Phase, scalars: &[(&str, f64)], step: usize) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records
                .scalars
                .extend(scalars.iter().map(|&(name, value)| ScalarEntry {
                    phase,
                    name: name.to_string(),
                    step,
                    value,
                }));
        }
        Ok(())
    }

    fn add_panel(&mut self, phase: Phase, panel: &DisplayPanel, step: usize) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.panels.push((phase, step, panel.clone()));
        }
        Ok(())
    }
}
