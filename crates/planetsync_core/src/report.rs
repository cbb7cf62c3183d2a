use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::classify::{ReconciliationOutcome, RemoteCoordinate};

/// Audit report sink: one headerless CSV row per outcome, flushed as written.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl ReportWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(inner);
        Self { writer, rows: 0 }
    }

    pub fn write(&mut self, outcome: &ReconciliationOutcome) -> Result<()> {
        self.writer
            .write_record(report_row(outcome))
            .with_context(|| format!("failed to write report row for {}", outcome.source_name))?;
        self.writer.flush().context("failed to flush report")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|error| anyhow::anyhow!("failed to flush report: {}", error.error()))
    }
}

/// `sourceName,remoteId,category,sourceX,sourceY,remoteX,remoteY,extra`
pub fn report_row(outcome: &ReconciliationOutcome) -> [String; 8] {
    [
        outcome.source_name.clone(),
        outcome.remote_id.clone(),
        outcome.category.as_str().to_string(),
        render_number(outcome.source_x),
        render_number(outcome.source_y),
        render_remote(outcome.remote_x),
        render_remote(outcome.remote_y),
        outcome
            .distance
            .map(render_number)
            .unwrap_or_default(),
    ]
}

fn render_remote(value: RemoteCoordinate) -> String {
    match value {
        RemoteCoordinate::Absent => String::new(),
        RemoteCoordinate::NotApplicable => "0".to_string(),
        RemoteCoordinate::Value(value) => render_number(value),
    }
}

/// Shortest float form, with negative zero written as `0`.
fn render_number(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}
