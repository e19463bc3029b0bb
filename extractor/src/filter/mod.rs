//! Per-frame stages ahead of keyframe selection: stride sampling and
//! thumbnail similarity scoring.

pub mod sampler;
pub mod similarity;

pub use sampler::Sampler;
pub use similarity::Thumbnail;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("frame {index} has a pixel buffer that does not match its dimensions")]
    MalformedFrame { index: u64 },
}

/// ITU-R BT.601 luma, rounded to nearest.
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
    let weighted = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
    ((weighted + 500) / 1000) as u8
}
