pub mod image_sequence;

use crate::pipeline::types::FrameRecord;
use anyhow::Result;

pub trait FrameSource: Send {
    /// Returns the next `count` sequential frames.
    ///
    /// `Ok(None)` or a batch shorter than `count` means the stream is
    /// exhausted. An `Err` is a source failure; runners treat both the same.
    fn next_batch(&mut self, count: usize) -> Result<Option<Vec<FrameRecord>>>;
}
