// Size/mask normalizer
//
// Resizes every frame to a canonical size, blacks out configured rectangles,
// applies an optional alpha-derived mask and optionally reduces to luma.
// The order is fixed: rectangle coordinates live in target space and
// rectangle fills assume the multi-channel layout, so grayscale comes last.

use crate::config::Properties;
use crate::pipeline::normalizer::{NormalizeError, Normalizer};
use crate::pipeline::types::FrameRecord;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImage, GenericImageView, GrayImage, Luma, Rgba};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_NAME: &str = "size";

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Alpha values above this are treated as fully opaque.
const ALPHA_THRESHOLD: u8 = 254;

/// Rectangle in target-resolution pixels; both corners are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskRect {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskingParseError {
    #[error("masking list has {0} values, expected a multiple of 4")]
    Count(usize),
    #[error("masking value `{0}` is not an integer")]
    Value(String),
}

/// Parses `x1,y1,x2,y2[,x1,y1,x2,y2...]`. All or nothing.
pub fn parse_masking(value: &str) -> Result<Vec<MaskRect>, MaskingParseError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }

    let numbers = value
        .split(',')
        .map(str::trim)
        .map(|token| {
            token
                .parse::<i64>()
                .map_err(|_| MaskingParseError::Value(token.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if numbers.len() % 4 != 0 {
        return Err(MaskingParseError::Count(numbers.len()));
    }

    Ok(numbers
        .chunks_exact(4)
        .map(|c| MaskRect {
            x1: c[0],
            y1: c[1],
            x2: c[2],
            y2: c[3],
        })
        .collect())
}

/// Turns an alpha channel into a target-sized pass/block bitmap.
///
/// Each axis is scaled on its own, so the aspect ratio may change. Opaque
/// alpha (> 254) becomes 0 and is blocked; everything else becomes 255.
pub fn mask_from_alpha(alpha: &GrayImage, width: u32, height: u32) -> GrayImage {
    let mut mask = imageops::resize(alpha, width, height, FilterType::Triangle);
    for pixel in mask.pixels_mut() {
        pixel[0] = if pixel[0] > ALPHA_THRESHOLD { 0 } else { 255 };
    }
    mask
}

/// Loads an image and extracts its alpha channel.
pub fn load_alpha(path: &Path) -> Result<GrayImage, NormalizeError> {
    let image = image::open(path).map_err(|source| NormalizeError::MaskLoad {
        path: path.to_path_buf(),
        source,
    })?;
    let rgba = image.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(NormalizeError::EmptyMask(path.to_path_buf()));
    }
    Ok(GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        Luma([rgba.get_pixel(x, y)[3]])
    }))
}

pub struct SizeMaskNormalizer {
    name: String,
    target: Option<(u32, u32)>,
    gray: bool,
    masking: Vec<MaskRect>,
    custom_mask: Option<GrayImage>,
}

impl Default for SizeMaskNormalizer {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            target: None,
            gray: false,
            masking: Vec::new(),
            custom_mask: None,
        }
    }
}

impl SizeMaskNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures from properties and builds the custom mask named by
    /// `normalizer.<name>.custom_mask`, if any.
    pub fn from_properties(
        props: &Properties,
        name: &str,
        default_width: u32,
        default_height: u32,
    ) -> Result<Self, NormalizeError> {
        let width = dimension_property(props, &format!("normalizer.{}.width", name), default_width);
        let height =
            dimension_property(props, &format!("normalizer.{}.height", name), default_height);

        let mut normalizer = Self::new();
        normalizer.configure(props, name, width, height)?;

        let mask_path = props.get_string(&format!("normalizer.{}.custom_mask", name), "");
        normalizer.build_mask(Path::new(&mask_path))?;

        Ok(normalizer)
    }

    /// Sets the target size and reads `normalizer.<name>.masking` and the
    /// grayscale flag. A malformed masking list leaves no rectangles at all.
    pub fn configure(
        &mut self,
        props: &Properties,
        name: &str,
        width: u32,
        height: u32,
    ) -> Result<(), NormalizeError> {
        if width == 0 || height == 0 {
            return Err(NormalizeError::InvalidTarget { width, height });
        }
        if self.target != Some((width, height)) {
            // A mask built for another size can't be applied any more
            self.custom_mask = None;
        }
        self.name = name.to_string();
        self.target = Some((width, height));

        let masking_key = format!("normalizer.{}.masking", name);
        self.masking = match parse_masking(&props.get_string(&masking_key, "")) {
            Ok(rects) => rects,
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}. Static masking disabled.", masking_key, e);
                Vec::new()
            }
        };

        let global_gray = props.get_bool("normalizer.gray", false).unwrap_or_else(|e| {
            tracing::warn!("{}. Falling back to color output.", e);
            false
        });
        self.gray = props
            .get_bool(&format!("normalizer.{}.gray", name), global_gray)
            .unwrap_or_else(|e| {
                tracing::warn!("{}. Falling back to normalizer.gray.", e);
                global_gray
            });

        tracing::info!(
            "Normalizer {}: target {}x{}, {} mask rectangles, gray={}",
            self.name,
            width,
            height,
            self.masking.len(),
            self.gray
        );
        Ok(())
    }

    /// Builds the custom mask from the alpha channel of the image at `path`.
    ///
    /// An empty path leaves custom masking off. A missing or undecodable image
    /// is logged and also leaves it off. Returns whether masking is now enabled.
    pub fn build_mask(&mut self, path: &Path) -> Result<bool, NormalizeError> {
        if path.as_os_str().is_empty() {
            return Ok(false);
        }
        if self.target.is_none() {
            tracing::error!(
                "Normalizer {}: cannot build mask from {:?} before the target size is configured",
                self.name,
                path
            );
            return Err(NormalizeError::NotConfigured(self.name.clone()));
        }

        match load_alpha(path) {
            Ok(alpha) => {
                self.set_custom_mask_from_alpha(&alpha)?;
                tracing::info!("Normalizer {}: custom mask loaded from {:?}", self.name, path);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Normalizer {}: {}. Custom masking disabled.", self.name, e);
                self.custom_mask = None;
                Ok(false)
            }
        }
    }

    pub fn set_custom_mask_from_alpha(&mut self, alpha: &GrayImage) -> Result<(), NormalizeError> {
        let (width, height) = self
            .target
            .ok_or_else(|| NormalizeError::NotConfigured(self.name.clone()))?;
        self.custom_mask = Some(mask_from_alpha(alpha, width, height));
        Ok(())
    }

    pub fn target(&self) -> Option<(u32, u32)> {
        self.target
    }

    pub fn masking(&self) -> &[MaskRect] {
        &self.masking
    }

    pub fn is_gray(&self) -> bool {
        self.gray
    }

    pub fn has_custom_mask(&self) -> bool {
        self.custom_mask.is_some()
    }

    fn resize(&self, frame: &mut FrameRecord, width: u32, height: u32) -> Result<(), NormalizeError> {
        let (src_w, src_h) = (frame.source_width(), frame.source_height());
        if src_w == 0 || src_h == 0 {
            return Err(NormalizeError::DegenerateFrame {
                frame_index: frame.frame_index,
                width: src_w,
                height: src_h,
            });
        }

        let scale_x = width as f64 / src_w as f64;
        let scale_y = height as f64 / src_h as f64;
        let new_w = (src_w as f64 * scale_x).round() as u32;
        let new_h = (src_h as f64 * scale_y).round() as u32;

        // Scale factors are relative to the source size, so resize the original.
        let resized = frame
            .original()
            .resize_exact(new_w, new_h, FilterType::Triangle);
        frame.replace_working(resized);
        Ok(())
    }

    fn apply_custom_mask(&self, frame: &mut FrameRecord, mask: &GrayImage) -> Result<(), NormalizeError> {
        if mask.dimensions() != (frame.width(), frame.height()) {
            return Err(NormalizeError::MaskSizeMismatch {
                frame_index: frame.frame_index,
                mask_width: mask.width(),
                mask_height: mask.height(),
                width: frame.width(),
                height: frame.height(),
            });
        }

        let buffer = frame.working_pixels_mut();
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel[0] == 0 {
                buffer.put_pixel(x, y, BLACK);
            }
        }
        Ok(())
    }
}

impl Normalizer for SizeMaskNormalizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, frame: &mut FrameRecord) -> Result<(), NormalizeError> {
        let (width, height) = self
            .target
            .ok_or_else(|| NormalizeError::NotConfigured(self.name.clone()))?;

        // 1. Resize
        if frame.source_width() != width || frame.source_height() != height {
            self.resize(frame, width, height)?;
        }

        // 2. Static rectangles
        for rect in &self.masking {
            fill_rect(frame.working_pixels_mut(), rect);
        }

        // 3. Custom mask
        if let Some(mask) = &self.custom_mask {
            self.apply_custom_mask(frame, mask)?;
        }

        // 4. Grayscale
        if self.gray {
            let luma = DynamicImage::ImageLuma8(frame.working().to_luma8());
            frame.replace_working(luma);
        }

        Ok(())
    }
}

/// Zeroes every channel inside `rect`, clipped to the buffer.
fn fill_rect(buffer: &mut DynamicImage, rect: &MaskRect) {
    let (width, height) = buffer.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let max_x = width as i64 - 1;
    let max_y = height as i64 - 1;

    let (left, right) = (rect.x1.min(rect.x2), rect.x1.max(rect.x2));
    let (top, bottom) = (rect.y1.min(rect.y2), rect.y1.max(rect.y2));
    if right < 0 || bottom < 0 || left > max_x || top > max_y {
        return;
    }

    for y in top.max(0)..=bottom.min(max_y) {
        for x in left.max(0)..=right.min(max_x) {
            buffer.put_pixel(x as u32, y as u32, BLACK);
        }
    }
}

fn dimension_property(props: &Properties, key: &str, default: u32) -> u32 {
    match props.get_int(key, default as i64) {
        Ok(value) if value > 0 && value <= u32::MAX as i64 => value as u32,
        Ok(value) => {
            tracing::warn!("{} = {} is out of range, using {}", key, value, default);
            default
        }
        Err(e) => {
            tracing::warn!("{}, using {}", e, default);
            default
        }
    }
}
