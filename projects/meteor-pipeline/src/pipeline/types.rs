use image::{DynamicImage, GenericImageView};
use serde::Serialize;

/// Number of numeric slots carried by every [`ResultRecord`].
pub const RESULT_VALUE_COUNT: usize = 10;

/// A decoded frame plus the buffer that normalization stages rewrite.
///
/// The working buffer and the `width`/`height` pair are only ever replaced
/// together, so the reported size always matches the buffer.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub frame_timestamp_ms: f64,
    source_width: u32,
    source_height: u32,
    width: u32,
    height: u32,
    original: DynamicImage,
    working: DynamicImage,
}

impl FrameRecord {
    pub fn new(frame_index: u64, frame_timestamp_ms: f64, image: DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            frame_index,
            frame_timestamp_ms,
            source_width: width,
            source_height: height,
            width,
            height,
            working: image.clone(),
            original: image,
        }
    }

    pub fn source_width(&self) -> u32 {
        self.source_width
    }

    pub fn source_height(&self) -> u32 {
        self.source_height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The buffer exactly as decoded. Never touched by normalizers.
    pub fn original(&self) -> &DynamicImage {
        &self.original
    }

    pub fn working(&self) -> &DynamicImage {
        &self.working
    }

    /// In-place pixel access. Size changes go through [`Self::replace_working`].
    pub(crate) fn working_pixels_mut(&mut self) -> &mut DynamicImage {
        &mut self.working
    }

    /// Swaps in a new working buffer and adopts its dimensions.
    pub fn replace_working(&mut self, buffer: DynamicImage) {
        let (width, height) = buffer.dimensions();
        self.working = buffer;
        self.width = width;
        self.height = height;
    }

    pub fn channel_count(&self) -> u8 {
        self.working.color().channel_count()
    }
}

/// Outcome of one detection evaluation over a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultRecord {
    pub frame_index: u64,
    pub frame_timestamp_ms: f64,
    /// 0 means not applicable.
    pub mark: i32,
    pub result_values: [f64; RESULT_VALUE_COUNT],
    pub message: String,
}

impl ResultRecord {
    /// Fresh record stamped with the first frame of the batch.
    pub fn for_batch(first: &FrameRecord) -> Self {
        Self {
            frame_index: first.frame_index,
            frame_timestamp_ms: first.frame_timestamp_ms,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunnerState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The shutdown signal was observed at a batch boundary.
    Shutdown,
    /// The source could not supply a full batch.
    EndOfStream,
    /// The source reported an error; treated like end of stream.
    SourceError,
}

/// Counters for a single pipeline instance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub batches: usize,
    pub detections: usize,
    pub sink_failures: usize,
    pub ms_per_batch: f64,
    pub stop_reason: Option<StopReason>,
}

impl RunStats {
    pub fn record_batch(&mut self, duration_ms: f64) {
        self.batches += 1;
        // Simple exponential moving average for smoothing durations
        if self.ms_per_batch == 0.0 {
            self.ms_per_batch = duration_ms;
        } else {
            self.ms_per_batch = self.ms_per_batch * 0.9 + duration_ms * 0.1;
        }
    }
}
