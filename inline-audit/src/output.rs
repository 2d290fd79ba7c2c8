//! Output sinks for audit results.
//!
//! Sinks receive the final report and, when a profile was recorded, the
//! attributed samples as collapse-format stack lines.

use std::path::PathBuf;

use anyhow::{Context, Result};
use inferno::flamegraph::{self, Options};

use crate::report::AuditReport;

pub trait OutputSink {
    /// Called once when the audit is complete.
    fn finish(&mut self, report: &AuditReport, stacks: &[String]) -> Result<()>;
}

/// Fans out to multiple sinks.
pub struct MultiplexSink {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl MultiplexSink {
    pub fn new(sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self { sinks }
    }
}

impl OutputSink for MultiplexSink {
    fn finish(&mut self, report: &AuditReport, stacks: &[String]) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.finish(report, stacks) {
                tracing::warn!("MultiplexSink: finish error: {:#}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Writes an SVG flamegraph of the attributed samples.
pub struct SvgSink {
    path: PathBuf,
    title: String,
}

impl SvgSink {
    pub fn new(path: PathBuf, title: String) -> Self {
        Self { path, title }
    }
}

impl OutputSink for SvgSink {
    fn finish(&mut self, _report: &AuditReport, stacks: &[String]) -> Result<()> {
        if stacks.is_empty() {
            tracing::warn!("No samples, skipping {}", self.path.display());
            return Ok(());
        }
        let mut opts = Options::default();
        opts.title = self.title.clone();
        let mut writer = std::io::BufWriter::new(std::fs::File::create(&self.path)?);
        flamegraph::from_lines(&mut opts, stacks.iter().map(|v| v.as_str()), &mut writer)
            .map_err(|e| {
                tracing::error!("Failed to write SVG {:?}: {:?}", self.path, e);
                e
            })?;
        Ok(())
    }
}

/// Writes the attributed samples in stackcollapse format.
pub struct CollapseSink {
    path: PathBuf,
}

impl CollapseSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OutputSink for CollapseSink {
    fn finish(&mut self, _report: &AuditReport, stacks: &[String]) -> Result<()> {
        tracing::info!("Writing to file: {}", self.path.display());
        std::fs::write(&self.path, stacks.join("\n"))
            .context("Unable to write stack collapsed file")?;
        Ok(())
    }
}

/// Writes the report as JSON.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OutputSink for JsonFileSink {
    fn finish(&mut self, report: &AuditReport, _stacks: &[String]) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&self.path, json).context("Unable to write JSON file")?;
        Ok(())
    }
}
