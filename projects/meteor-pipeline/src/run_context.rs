use crate::pipeline::types::RunStats;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const RESULTS_FILE: &str = "results.csv";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunMetadata {
    pub input: String,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    pub normalizer: String,
    pub target_width: u32,
    pub target_height: u32,
    #[serde(skip)]
    pub output_dir: PathBuf,
}

impl RunMetadata {
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(RESULTS_FILE)
    }
}

/// Run id for an input: its final path component.
pub fn run_id_for(input: &Path) -> Result<&str> {
    input
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("Invalid input path: {:?}", input))
}

/// Prepares `<output_root>/<input stem>` and writes `metadata.json` into it.
/// An existing directory is reused.
pub fn create_run(
    output_root: &Path,
    input: &Path,
    normalizer: &str,
    target: (u32, u32),
) -> Result<RunMetadata> {
    let stem = run_id_for(input)?;

    let output_dir = output_root.join(stem);
    if output_dir.exists() {
        tracing::info!("Reusing output directory {:?}", output_dir);
    }
    fs::create_dir_all(&output_dir)?;

    let metadata = RunMetadata {
        input: input.to_string_lossy().to_string(),
        created_at: Utc::now(),
        run_id: stem.to_string(),
        normalizer: normalizer.to_string(),
        target_width: target.0,
        target_height: target.1,
        output_dir: output_dir.clone(),
    };

    let metadata_path = output_dir.join("metadata.json");
    let content = serde_json::to_string_pretty(&metadata)?;
    fs::write(metadata_path, content)?;

    Ok(metadata)
}

pub fn write_stats(metadata: &RunMetadata, stats: &RunStats) -> Result<()> {
    let path = metadata.output_dir.join("stats.json");
    fs::write(path, serde_json::to_string_pretty(stats)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_run_writes_metadata() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("night_cam_01");

        let metadata = create_run(root.path(), &input, "size", (640, 480)).unwrap();
        assert_eq!(metadata.run_id, "night_cam_01");
        assert_eq!(metadata.results_path(), root.path().join("night_cam_01").join(RESULTS_FILE));

        let content = fs::read_to_string(metadata.output_dir.join("metadata.json")).unwrap();
        let loaded: RunMetadata = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.normalizer, "size");
        assert_eq!((loaded.target_width, loaded.target_height), (640, 480));
        assert_eq!(loaded.input, input.to_string_lossy());

        // Second run over the same input reuses the directory
        assert!(create_run(root.path(), &input, "size", (640, 480)).is_ok());

        let mut stats = RunStats::default();
        stats.record_batch(5.0);
        write_stats(&metadata, &stats).unwrap();
        assert!(metadata.output_dir.join("stats.json").exists());
    }
}
