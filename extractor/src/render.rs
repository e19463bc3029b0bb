use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView, ImageBuffer, ImageEncoder, Rgb};
use pdf_writer::{Content, Name, Str};
use slidedeck_common::config::{PipelineConfig, RegionConfig};
use slidedeck_common::frame::{Frame, Keyframe};
use tracing::debug;

use crate::filter::luma;

/// Binary label color picked from the brightness under the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelColor {
    /// White text, for dark backgrounds.
    Light,
    /// Black text.
    Dark,
}

impl LabelColor {
    /// Mean luma strictly below `split` gets light text.
    pub fn for_brightness(mean: u8, split: u8) -> Self {
        if mean < split {
            LabelColor::Light
        } else {
            LabelColor::Dark
        }
    }

    pub fn rgb(self) -> [f32; 3] {
        match self {
            LabelColor::Light => [1.0, 1.0, 1.0],
            LabelColor::Dark => [0.0, 0.0, 0.0],
        }
    }
}

/// One composed page, ready to be placed in the document.
#[derive(Debug, Clone)]
pub struct Slide {
    pub frame_index: u64,
    pub timestamp_secs: u64,
    pub width: u32,
    pub height: u32,
    pub label: String,
    pub color: LabelColor,
    /// Label anchor in image pixels, origin top-left.
    pub anchor: (u32, u32),
    pub font_size: f32,
    /// Baseline JPEG of the full frame.
    pub jpeg: Vec<u8>,
}

impl Slide {
    /// Content stream drawing the image full-bleed and the label on top.
    ///
    /// Page space is one unit per image pixel with the origin bottom-left.
    pub fn content_stream(&self, image: Name<'_>, font: Name<'_>) -> Vec<u8> {
        let (w, h) = (self.width as f32, self.height as f32);
        let mut content = Content::new();

        content.save_state();
        content.transform([w, 0.0, 0.0, h, 0.0, 0.0]);
        content.x_object(image);
        content.restore_state();

        let [r, g, b] = self.color.rgb();
        let x = self.anchor.0 as f32;
        let baseline = (h - self.anchor.1 as f32 - self.font_size).max(0.0);
        content.begin_text();
        content.set_fill_rgb(r, g, b);
        content.set_font(font, self.font_size);
        content.next_line(x, baseline);
        content.show(Str(self.label.as_bytes()));
        content.end_text();

        content.finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("keyframe {index} has an empty or malformed pixel buffer")]
    InvalidFrame { index: u64 },
    #[error("failed to encode keyframe {index}: {source}")]
    Encode {
        index: u64,
        #[source]
        source: image::ImageError,
    },
}

/// Turns keyframes into slides.
#[derive(Debug, Clone)]
pub struct SlideRenderer {
    region: RegionConfig,
    split: u8,
    font_size: f32,
    jpeg_quality: u8,
}

impl SlideRenderer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            region: config.brightness_region,
            split: config.brightness_split,
            font_size: config.label_font_size,
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Consumes the keyframe; its pixel buffer is released once encoded.
    pub fn render(&self, keyframe: Keyframe) -> Result<Slide, RenderError> {
        let frame = &keyframe.frame;
        let index = frame.index;
        if frame.width == 0
            || frame.height == 0
            || frame.rgb.len() != Frame::buffer_len(frame.width, frame.height)
        {
            return Err(RenderError::InvalidFrame { index });
        }

        let mean = region_mean_luma(frame, self.region)
            .ok_or(RenderError::InvalidFrame { index })?;
        let color = LabelColor::for_brightness(mean, self.split);

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), self.jpeg_quality)
            .write_image(&frame.rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|source| RenderError::Encode { index, source })?;

        let label = keyframe.label();
        debug!(
            index,
            label = %label,
            mean_luma = mean,
            color = ?color,
            jpeg_bytes = jpeg.len(),
            "slide rendered"
        );

        Ok(Slide {
            frame_index: index,
            timestamp_secs: keyframe.timestamp_secs,
            width: frame.width,
            height: frame.height,
            label,
            color,
            anchor: (self.region.x, self.region.y),
            font_size: self.font_size,
            jpeg,
        })
    }
}

/// Mean BT.601 luma of `region`, clipped to the frame. Falls back to the whole
/// frame when the region lies entirely outside it.
pub fn region_mean_luma(frame: &Frame, region: RegionConfig) -> Option<u8> {
    let image: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgb.as_slice())?;

    let inside = region.x < frame.width && region.y < frame.height;
    let (x, y, w, h) = if inside {
        (
            region.x,
            region.y,
            region.width.min(frame.width - region.x),
            region.height.min(frame.height - region.y),
        )
    } else {
        (0, 0, frame.width, frame.height)
    };
    if w == 0 || h == 0 {
        return None;
    }

    let patch = image.view(x, y, w, h);
    let count = u64::from(w) * u64::from(h);
    let sum: u64 = patch
        .pixels()
        .map(|(_, _, Rgb(p))| u64::from(luma(p)))
        .sum();
    Some(((sum + count / 2) / count) as u8)
}
