// Result sinks: where positive detections end up.

use crate::pipeline::types::{ResultRecord, RESULT_VALUE_COUNT};
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

pub trait ResultSink: Send {
    fn run(&mut self, result: &ResultRecord) -> Result<()>;
}

/// Appends one CSV row per result, flushing after each so partial runs
/// still leave usable output.
pub struct CsvSink {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl CsvSink {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create results file {:?}", path))?;

        let mut header = vec![
            "frame_index".to_string(),
            "frame_timestamp_ms".to_string(),
            "mark".to_string(),
        ];
        header.extend((0..RESULT_VALUE_COUNT).map(|i| format!("r{}", i)));
        header.push("message".to_string());
        writer.write_record(&header)?;
        writer.flush()?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvSink {
    fn run(&mut self, result: &ResultRecord) -> Result<()> {
        let mut row = vec![
            result.frame_index.to_string(),
            format!("{:.3}", result.frame_timestamp_ms),
            result.mark.to_string(),
        ];
        row.extend(result.result_values.iter().map(|v| v.to_string()));
        row.push(result.message.clone());

        self.writer
            .write_record(&row)
            .with_context(|| format!("Failed to write result row to {:?}", self.path))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink that only logs results.
#[derive(Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn run(&mut self, result: &ResultRecord) -> Result<()> {
        tracing::info!(
            "Detection at frame {} ({:.1} ms), mark={}: {}",
            result.frame_index,
            result.frame_timestamp_ms,
            result.mark,
            result.message
        );
        Ok(())
    }
}
