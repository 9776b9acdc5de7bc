use crate::pipeline::types::FrameRecord;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("normalizer `{0}` has no target size yet; configure it first")]
    NotConfigured(String),
    #[error("invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },
    #[error("frame {frame_index} has degenerate source size {width}x{height}")]
    DegenerateFrame {
        frame_index: u64,
        width: u32,
        height: u32,
    },
    #[error(
        "custom mask is {mask_width}x{mask_height} but frame {frame_index} is {width}x{height}"
    )]
    MaskSizeMismatch {
        frame_index: u64,
        mask_width: u32,
        mask_height: u32,
        width: u32,
        height: u32,
    },
    #[error("mask image {0:?} is empty")]
    EmptyMask(PathBuf),
    #[error("failed to load mask image {path:?}: {source}")]
    MaskLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A stage that rewrites a frame's working buffer before detection.
///
/// Implementations must leave the original buffer untouched.
pub trait Normalizer: Send {
    /// Namespace used to look up this instance's properties.
    fn name(&self) -> &str;

    fn run(&self, frame: &mut FrameRecord) -> Result<(), NormalizeError>;
}

/// Pass-through normalizer.
#[derive(Debug, Clone)]
pub struct IdentityNormalizer {
    name: String,
}

impl IdentityNormalizer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Normalizer for IdentityNormalizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _frame: &mut FrameRecord) -> Result<(), NormalizeError> {
        Ok(())
    }
}
