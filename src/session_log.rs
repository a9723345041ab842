use crate::types::{TelemetrySample, SESSION_LOG_HEADER};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Append-only CSV record of a simple-mode roast.
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Truncate the log and write the header row.
    pub fn reset(&self) -> std::io::Result<()> {
        let mut file = File::create(&self.path)?;
        writeln!(file, "{}", SESSION_LOG_HEADER)
    }

    pub fn append(&self, sample: &TelemetrySample) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        writeln!(file, "{}", format_row(sample))
    }
}

/// `t,setpoint,output,temperature`, shared by the CSV log and the `data`
/// telemetry message.
pub fn format_row(sample: &TelemetrySample) -> String {
    format!(
        "{},{},{},{}",
        sample.timestamp, sample.setpoint, sample.output, sample.temperature
    )
}
