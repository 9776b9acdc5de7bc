// Image sequence source: decodes a directory of still frames on a reader thread
// and hands them out in batches.

use super::FrameSource;
use crate::pipeline::types::FrameRecord;
use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::thread;
use walkdir::WalkDir;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Decoded frames buffered ahead of the consumer.
const READ_AHEAD: usize = 4;

const FALLBACK_FPS: f64 = 30.0;

/// Lists frame images under `dir`, ordered by file name.
pub fn list_frames(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| FRAME_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

pub struct ImageSequenceSource {
    rx: Receiver<Result<FrameRecord>>,
    carry: Vec<FrameRecord>,
    overlap: usize,
    total_frames: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        if !dir.is_dir() {
            return Err(anyhow!("Frame directory NOT FOUND at: {:?}", dir));
        }
        let paths = list_frames(dir);
        if paths.is_empty() {
            return Err(anyhow!("No image frames found in {:?}", dir));
        }

        let fps = if fps > 0.0 {
            fps
        } else {
            tracing::warn!(
                "ImageSequenceSource: invalid fps {}, falling back to {}",
                fps,
                FALLBACK_FPS
            );
            FALLBACK_FPS
        };

        let total_frames = paths.len();
        tracing::info!(
            "ImageSequenceSource: opened {:?}, frames={}, fps={:.2}",
            dir,
            total_frames,
            fps
        );

        // Tight bound so a slow detector doesn't pile up decoded frames
        let (tx, rx) = channel::bounded(READ_AHEAD);
        let label = dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("frames")
            .to_string();
        thread::Builder::new()
            .name(format!("reader-{}", label))
            .spawn(move || read_worker(paths, fps, tx))
            .context("Failed to spawn reader thread")?;

        Ok(Self {
            rx,
            carry: Vec::new(),
            overlap: 0,
            total_frames,
        })
    }

    /// Carries the last `overlap` frames of each batch into the next one.
    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_batch(&mut self, count: usize) -> Result<Option<Vec<FrameRecord>>> {
        let keep = self.overlap.min(count.saturating_sub(1));
        let start = self.carry.len().saturating_sub(keep);
        let mut batch: Vec<FrameRecord> = self.carry.drain(start..).collect();
        self.carry.clear();

        while batch.len() < count {
            match self.rx.recv() {
                Ok(Ok(frame)) => batch.push(frame),
                Ok(Err(e)) => return Err(e),
                // Reader finished
                Err(_) => return Ok(None),
            }
        }

        self.carry = batch[batch.len() - keep..].to_vec();
        Ok(Some(batch))
    }
}

/// Decodes frames in order and sends them downstream. Stops at the first
/// undecodable file or when the receiver goes away.
fn read_worker(paths: Vec<PathBuf>, fps: f64, tx: Sender<Result<FrameRecord>>) {
    for (index, path) in paths.into_iter().enumerate() {
        let record = image::open(&path)
            .with_context(|| format!("Failed to decode frame {:?}", path))
            .map(|image| FrameRecord::new(index as u64, index as f64 * 1000.0 / fps, image));
        let failed = record.is_err();

        if tx.send(record).is_err() {
            return; // Receiver closed
        }
        if failed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frames(dir: &Path, count: u8) {
        for i in 0..count {
            let image = RgbImage::from_pixel(4, 4, Rgb([i, i, i]));
            image.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
        }
    }

    fn indices(batch: &[FrameRecord]) -> Vec<u64> {
        batch.iter().map(|f| f.frame_index).collect()
    }

    #[test]
    fn test_list_frames_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let frames = list_frames(dir.path());
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["frame_000.png", "frame_001.png", "frame_002.png"]);
    }

    #[test]
    fn test_batches_without_overlap() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 5);

        let mut source = ImageSequenceSource::open(dir.path(), 10.0).unwrap();
        assert_eq!(source.total_frames(), 5);

        let first = source.next_batch(2).unwrap().unwrap();
        assert_eq!(indices(&first), vec![0, 1]);
        assert_eq!(first[1].frame_timestamp_ms, 100.0);
        assert_eq!(first[1].working().to_rgb8().get_pixel(0, 0).0, [1, 1, 1]);

        let second = source.next_batch(2).unwrap().unwrap();
        assert_eq!(indices(&second), vec![2, 3]);

        // Only one frame left, not a full batch
        assert!(source.next_batch(2).unwrap().is_none());
    }

    #[test]
    fn test_batches_with_overlap() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 4);

        let mut source = ImageSequenceSource::open(dir.path(), 30.0)
            .unwrap()
            .with_overlap(1);
        let mut seen = Vec::new();
        while let Some(batch) = source.next_batch(2).unwrap() {
            seen.push(indices(&batch));
        }
        assert_eq!(seen, vec![vec![0, 1], vec![1, 2], vec![2, 3]]);
    }

    #[test]
    fn test_undecodable_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 1);
        std::fs::write(dir.path().join("frame_001.png"), b"not a png").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 30.0).unwrap();
        assert!(source.next_batch(2).is_err());
    }

    #[test]
    fn test_open_rejects_empty_or_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path(), 30.0).is_err());
        assert!(ImageSequenceSource::open(&dir.path().join("missing"), 30.0).is_err());
    }
}
