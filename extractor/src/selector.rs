use tracing::{debug, warn};

use crate::filter::Thumbnail;

/// Selector memory between sampled frames.
#[derive(Debug, Clone)]
pub enum SelectorState {
    /// No keyframe kept yet; the next sample is kept unconditionally.
    AwaitingFirst,
    Tracking {
        /// Thumbnail of the most recent keyframe.
        last_kept: Thumbnail,
        last_kept_index: u64,
        /// Thumbnail of the most recent sample, kept or not. Every
        /// comparison is made against this one.
        last_seen: Thumbnail,
    },
}

/// Outcome of feeding one sampled frame to the selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// First sample of the run.
    Seed,
    /// Dissimilar and far enough from the previous keyframe.
    Keep { similarity: Option<f64> },
    /// Too similar to the previous sample.
    Similar { similarity: f64 },
    /// Dissimilar, but within the elapsed gate of the previous keyframe.
    TooSoon { similarity: Option<f64>, elapsed: u64 },
}

impl Verdict {
    pub fn is_keep(&self) -> bool {
        matches!(self, Verdict::Seed | Verdict::Keep { .. })
    }
}

/// Decides which sampled frames become keyframes.
///
/// A sample is kept when it scores below `threshold` against the previously
/// seen sample and more than `gate` frames have passed since the last
/// keyframe. The gate is the stream's frame rate, so keyframes are at least
/// about one second of source time apart.
#[derive(Debug)]
pub struct KeyframeSelector {
    state: SelectorState,
    threshold: f64,
    gate: u64,
}

impl KeyframeSelector {
    /// `fps` of zero is treated as one.
    pub fn new(threshold: f64, fps: u32) -> Self {
        Self {
            state: SelectorState::AwaitingFirst,
            threshold,
            gate: u64::from(fps.max(1)),
        }
    }

    pub fn gate(&self) -> u64 {
        self.gate
    }

    #[cfg(test)]
    fn state(&self) -> &SelectorState {
        &self.state
    }

    pub fn last_kept_index(&self) -> Option<u64> {
        match &self.state {
            SelectorState::AwaitingFirst => None,
            SelectorState::Tracking { last_kept_index, .. } => Some(*last_kept_index),
        }
    }

    /// Feeds the thumbnail of sampled frame `index`. Indices must increase.
    pub fn observe(&mut self, index: u64, thumbnail: Thumbnail) -> Verdict {
        let previous = std::mem::replace(&mut self.state, SelectorState::AwaitingFirst);
        let (next, verdict) = match previous {
            SelectorState::AwaitingFirst => {
                debug!(index, "first sample, keeping unconditionally");
                (
                    SelectorState::Tracking {
                        last_kept: thumbnail.clone(),
                        last_kept_index: index,
                        last_seen: thumbnail,
                    },
                    Verdict::Seed,
                )
            }
            SelectorState::Tracking {
                last_kept,
                last_kept_index,
                last_seen,
            } => {
                let similarity = thumbnail.similarity(&last_seen);
                if similarity.is_none() {
                    warn!(index, "thumbnail sizes differ, treating sample as dissimilar");
                }
                let elapsed = index.saturating_sub(last_kept_index);
                let dissimilar = similarity.map_or(true, |s| s < self.threshold);
                let verdict = match similarity {
                    Some(s) if !dissimilar => Verdict::Similar { similarity: s },
                    _ if elapsed <= self.gate => Verdict::TooSoon { similarity, elapsed },
                    _ => Verdict::Keep { similarity },
                };
                debug!(
                    index,
                    similarity = ?similarity,
                    threshold = self.threshold,
                    elapsed,
                    gate = self.gate,
                    kept = verdict.is_keep(),
                    "similarity check"
                );
                let next = if verdict.is_keep() {
                    SelectorState::Tracking {
                        last_kept: thumbnail.clone(),
                        last_kept_index: index,
                        last_seen: thumbnail,
                    }
                } else {
                    SelectorState::Tracking {
                        last_kept,
                        last_kept_index,
                        last_seen: thumbnail,
                    }
                };
                (next, verdict)
            }
        };
        self.state = next;
        verdict
    }
}
