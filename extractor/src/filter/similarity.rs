use image::imageops::{self, FilterType};
use image::GrayImage;
use slidedeck_common::frame::Frame;

use super::{luma, FilterError};

/// Side length of the square SSIM window.
const WINDOW: usize = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// Small grayscale downsample of a frame, used only for scoring.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    image: GrayImage,
}

impl Thumbnail {
    /// Converts to BT.601 luma and resizes to `width` x `height`.
    pub fn from_frame(frame: &Frame, width: u32, height: u32) -> Result<Self, FilterError> {
        let malformed = FilterError::MalformedFrame { index: frame.index };
        if frame.width == 0
            || frame.height == 0
            || frame.rgb.len() != Frame::buffer_len(frame.width, frame.height)
        {
            return Err(malformed);
        }
        let pixels = frame
            .rgb
            .chunks_exact(3)
            .map(|p| luma([p[0], p[1], p[2]]))
            .collect();
        let gray = GrayImage::from_raw(frame.width, frame.height, pixels).ok_or(malformed)?;
        let image = imageops::resize(&gray, width, height, FilterType::Triangle);
        Ok(Self { image })
    }

    pub fn from_gray(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// `max - min` over all pixels, floored at 1 so flat images stay comparable.
    pub fn data_range(&self) -> f64 {
        let (min, max) = self
            .image
            .as_raw()
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        f64::from(max.saturating_sub(min)).max(1.0)
    }

    /// Mean structural similarity against `basis`, using this thumbnail's
    /// dynamic range. `None` when the sizes differ or are below one window.
    pub fn similarity(&self, basis: &Thumbnail) -> Option<f64> {
        if self.dimensions() != basis.dimensions() {
            return None;
        }
        structural_similarity(&self.image, &basis.image, self.data_range())
    }
}

/// Mean SSIM over every fully contained `WINDOW` x `WINDOW` window using a
/// uniform filter and sample covariance.
pub fn structural_similarity(a: &GrayImage, b: &GrayImage, data_range: f64) -> Option<f64> {
    let (w, h) = (a.width() as usize, a.height() as usize);
    if (w, h) != (b.width() as usize, b.height() as usize) || w < WINDOW || h < WINDOW {
        return None;
    }

    let pa = a.as_raw();
    let pb = b.as_raw();
    let sum_a = SummedArea::new(w, h, |i| f64::from(pa[i]));
    let sum_b = SummedArea::new(w, h, |i| f64::from(pb[i]));
    let sum_aa = SummedArea::new(w, h, |i| f64::from(pa[i]) * f64::from(pa[i]));
    let sum_bb = SummedArea::new(w, h, |i| f64::from(pb[i]) * f64::from(pb[i]));
    let sum_ab = SummedArea::new(w, h, |i| f64::from(pa[i]) * f64::from(pb[i]));

    let n = (WINDOW * WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * data_range).powi(2);
    let c2 = (K2 * data_range).powi(2);

    let mut total = 0.0;
    let mut windows = 0usize;
    for y in 0..=h - WINDOW {
        for x in 0..=w - WINDOW {
            let ux = sum_a.window(x, y) / n;
            let uy = sum_b.window(x, y) / n;
            let vx = cov_norm * (sum_aa.window(x, y) / n - ux * ux);
            let vy = cov_norm * (sum_bb.window(x, y) / n - uy * uy);
            let vxy = cov_norm * (sum_ab.window(x, y) / n - ux * uy);

            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            windows += 1;
        }
    }
    Some(total / windows as f64)
}

/// Summed-area table with a zero row and column prepended.
struct SummedArea {
    stride: usize,
    table: Vec<f64>,
}

impl SummedArea {
    fn new(w: usize, h: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = w + 1;
        let mut table = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0.0;
            for x in 0..w {
                row += value(y * w + x);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        Self { stride, table }
    }

    fn at(&self, x: usize, y: usize) -> f64 {
        self.table[y * self.stride + x]
    }

    /// Sum of the window whose top-left pixel is (x, y).
    fn window(&self, x: usize, y: usize) -> f64 {
        let (x1, y1) = (x + WINDOW, y + WINDOW);
        self.at(x1, y1) - self.at(x, y1) - self.at(x1, y) + self.at(x, y)
    }
}
