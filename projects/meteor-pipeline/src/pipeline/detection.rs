use crate::config::Properties;
use crate::pipeline::normalizer::Normalizer;
use crate::pipeline::types::{FrameRecord, ResultRecord};
use anyhow::{bail, Context, Result};
use image::{DynamicImage, GrayImage};

/// Decides whether a batch of frames contains something worth exporting.
pub trait Detector: Send {
    /// Batch size this detector needs per evaluation.
    fn required_frame_count(&self) -> usize;

    /// Evaluates one batch. Returns true when `result` was filled with a
    /// detection that should be exported.
    fn run(&mut self, batch: &mut [FrameRecord], result: &mut ResultRecord) -> Result<bool>;
}

/// Configuration for the frame-difference detector
#[derive(Debug, Clone, PartialEq)]
pub struct DiffConfig {
    /// Frames per batch (at least 2)
    pub frames: usize,
    /// Luma delta above which a pixel counts as changed
    pub pixel_threshold: u8,
    /// Changed-pixel ratio window reported as a detection
    pub min_ratio: f64,
    pub max_ratio: f64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            frames: 2,
            pixel_threshold: 40,
            min_ratio: 0.0001,
            max_ratio: 0.05,
        }
    }
}

impl DiffConfig {
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let defaults = Self::default();
        let frames = props.get_int("detector.diff.frames", defaults.frames as i64)?;
        let pixel_threshold = props.get_int(
            "detector.diff.pixel_threshold",
            defaults.pixel_threshold as i64,
        )?;
        let min_ratio = props.get_f64("detector.diff.min_ratio", defaults.min_ratio)?;
        let max_ratio = props.get_f64("detector.diff.max_ratio", defaults.max_ratio)?;

        if frames < 2 {
            bail!("detector.diff.frames must be at least 2, got {}", frames);
        }
        if !(0..=255).contains(&pixel_threshold) {
            bail!(
                "detector.diff.pixel_threshold must be within 0..=255, got {}",
                pixel_threshold
            );
        }
        if min_ratio > max_ratio {
            bail!(
                "detector.diff.min_ratio ({}) exceeds max_ratio ({})",
                min_ratio,
                max_ratio
            );
        }

        Ok(Self {
            frames: frames as usize,
            pixel_threshold: pixel_threshold as u8,
            min_ratio,
            max_ratio,
        })
    }
}

/// Changes between one pair of consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PairChange {
    pair: usize,
    changed: usize,
    ratio: f64,
    mean_delta: f64,
    centroid_x: f64,
    centroid_y: f64,
}

/// Reference detector: flags batches where a small fraction of pixels
/// changes brightness between consecutive normalized frames, the signature of
/// a short-lived streak against a static sky.
pub struct FrameDiffDetector {
    normalizer: Box<dyn Normalizer>,
    config: DiffConfig,
}

impl FrameDiffDetector {
    pub fn new(normalizer: Box<dyn Normalizer>, config: DiffConfig) -> Self {
        Self { normalizer, config }
    }

    fn compare(&self, pair: usize, before: &GrayImage, after: &GrayImage) -> PairChange {
        let total = (before.width() as usize * before.height() as usize).max(1);
        let mut changed = 0usize;
        let mut delta_sum = 0u64;
        let (mut sum_x, mut sum_y) = (0f64, 0f64);

        for ((x, y, a), b) in before.enumerate_pixels().zip(after.pixels()) {
            let delta = a[0].abs_diff(b[0]);
            delta_sum += delta as u64;
            if delta > self.config.pixel_threshold {
                changed += 1;
                sum_x += x as f64;
                sum_y += y as f64;
            }
        }

        let (centroid_x, centroid_y) = if changed > 0 {
            (sum_x / changed as f64, sum_y / changed as f64)
        } else {
            (0.0, 0.0)
        };

        PairChange {
            pair,
            changed,
            ratio: changed as f64 / total as f64,
            mean_delta: delta_sum as f64 / total as f64,
            centroid_x,
            centroid_y,
        }
    }
}

fn luma_of(frame: &FrameRecord) -> GrayImage {
    match frame.working() {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}

impl Detector for FrameDiffDetector {
    fn required_frame_count(&self) -> usize {
        self.config.frames
    }

    fn run(&mut self, batch: &mut [FrameRecord], result: &mut ResultRecord) -> Result<bool> {
        for frame in batch.iter_mut() {
            self.normalizer
                .run(frame)
                .with_context(|| format!("Failed to normalize frame {}", frame.frame_index))?;
        }

        if batch.len() < 2 {
            tracing::debug!("FrameDiffDetector: batch of {} frames, nothing to compare", batch.len());
            return Ok(false);
        }

        let lumas: Vec<GrayImage> = batch.iter().map(luma_of).collect();
        let mut strongest: Option<PairChange> = None;
        for (pair, (window, frames)) in lumas.windows(2).zip(batch.windows(2)).enumerate() {
            let (before, after) = (&window[0], &window[1]);
            if before.dimensions() != after.dimensions() {
                bail!(
                    "Frame {} is {}x{} but frame {} is {}x{}",
                    frames[0].frame_index,
                    before.width(),
                    before.height(),
                    frames[1].frame_index,
                    after.width(),
                    after.height()
                );
            }
            let change = self.compare(pair, before, after);
            if strongest.map_or(true, |s| change.changed > s.changed) {
                strongest = Some(change);
            }
        }

        let Some(change) = strongest else {
            return Ok(false);
        };
        let detected = change.changed > 0
            && change.ratio >= self.config.min_ratio
            && change.ratio <= self.config.max_ratio;
        if !detected {
            return Ok(false);
        }

        result.mark = 1;
        result.result_values[0] = change.changed as f64;
        result.result_values[1] = change.ratio;
        result.result_values[2] = change.mean_delta;
        result.result_values[3] = change.centroid_x;
        result.result_values[4] = change.centroid_y;
        result.result_values[5] = change.pair as f64;
        result.message = format!(
            "{} changed pixels ({:.4}%) around ({:.1}, {:.1})",
            change.changed,
            change.ratio * 100.0,
            change.centroid_x,
            change.centroid_y
        );
        Ok(true)
    }
}
