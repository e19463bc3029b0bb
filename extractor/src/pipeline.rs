use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slidedeck_common::config::{ConfigError, PipelineConfig};
use slidedeck_common::frame::Keyframe;
use tracing::{debug, info};

use crate::assembler::DocumentAssembler;
use crate::filter::{FilterError, Sampler, Thumbnail};
use crate::render::{LabelColor, RenderError, SlideRenderer};
use crate::selector::KeyframeSelector;
use crate::source::{DecodeError, FfmpegSource, FrameSource};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("run cancelled after {frames} decoded frames")]
    Cancelled { frames: u64 },
    #[error("run exceeded its budget of {budget:?}")]
    DeadlineExceeded { budget: Duration },
}

/// Cooperative stop signal, checked before every decode call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where a kept frame ended up in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyframeSummary {
    pub frame_index: u64,
    pub timestamp_secs: u64,
    pub label: String,
    pub color: LabelColor,
}

#[derive(Debug, Clone)]
pub struct Deck {
    pub pdf: Vec<u8>,
    pub keyframes: Vec<KeyframeSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames_decoded: u64,
    pub frames_sampled: u64,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub enum DeckOutcome {
    Slides { deck: Deck, stats: RunStats },
    /// The stream produced no keyframes. Not an error.
    Empty { stats: RunStats },
}

impl DeckOutcome {
    pub fn stats(&self) -> &RunStats {
        match self {
            DeckOutcome::Slides { stats, .. } | DeckOutcome::Empty { stats } => stats,
        }
    }
}

/// One forward pass from a frame source to a slide deck.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancelToken,
    budget: Option<Duration>,
}

impl Pipeline {
    /// Validates the configuration up front.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let budget = config.max_run_secs.map(Duration::from_secs);
        Ok(Self {
            config,
            cancel: CancelToken::new(),
            budget,
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Decodes `path` with ffmpeg. The decoder is released on every exit path.
    pub fn run_file(&self, path: &Path) -> Result<DeckOutcome, PipelineError> {
        self.check_cancelled(0)?;
        let mut source = FfmpegSource::open(path)?;
        self.run(&mut source)
    }

    pub fn run<S: FrameSource>(&self, source: &mut S) -> Result<DeckOutcome, PipelineError> {
        let started = Instant::now();
        let fps = source.frame_rate();
        let sampler = Sampler::new(self.config.sample_stride);
        let mut selector = KeyframeSelector::new(self.config.similarity_threshold, fps);
        let renderer = SlideRenderer::new(&self.config);
        let mut assembler = DocumentAssembler::new();
        let mut keyframes = Vec::new();
        let mut stats = RunStats {
            fps,
            ..RunStats::default()
        };

        debug!(
            fps,
            gate = selector.gate(),
            stride = sampler.stride(),
            threshold = self.config.similarity_threshold,
            "pipeline started"
        );

        loop {
            self.check_cancelled(stats.frames_decoded)?;
            self.check_budget(started)?;

            let Some(frame) = source.next_frame()? else {
                break;
            };
            stats.frames_decoded += 1;
            if !sampler.admits(frame.index) {
                continue;
            }
            stats.frames_sampled += 1;

            let thumbnail = Thumbnail::from_frame(
                &frame,
                self.config.thumbnail_width,
                self.config.thumbnail_height,
            )?;
            if !selector.observe(frame.index, thumbnail).is_keep() {
                continue;
            }

            let slide = renderer.render(Keyframe::new(frame, fps))?;
            keyframes.push(KeyframeSummary {
                frame_index: slide.frame_index,
                timestamp_secs: slide.timestamp_secs,
                label: slide.label.clone(),
                color: slide.color,
            });
            assembler.push(slide);
        }

        let document = assembler.finish();
        info!(
            frames_decoded = stats.frames_decoded,
            frames_sampled = stats.frames_sampled,
            keyframes = document.page_count,
            bytes = document.bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline finished"
        );

        if document.is_empty() {
            return Ok(DeckOutcome::Empty { stats });
        }
        Ok(DeckOutcome::Slides {
            deck: Deck {
                pdf: document.bytes,
                keyframes,
            },
            stats,
        })
    }

    fn check_cancelled(&self, frames: u64) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            info!(frames, "pipeline cancelled");
            return Err(PipelineError::Cancelled { frames });
        }
        Ok(())
    }

    fn check_budget(&self, started: Instant) -> Result<(), PipelineError> {
        match self.budget {
            Some(budget) if started.elapsed() >= budget => {
                info!(budget_ms = budget.as_millis() as u64, "pipeline over budget");
                Err(PipelineError::DeadlineExceeded { budget })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidedeck_common::frame::Frame;

    const W: u32 = 64;
    const H: u32 = 36;

    /// In-memory source producing `len` frames from a color function.
    struct Synthetic<F: Fn(u64) -> [u8; 3]> {
        fps: u32,
        len: u64,
        next: u64,
        color: F,
        fail_at: Option<u64>,
    }

    impl<F: Fn(u64) -> [u8; 3]> Synthetic<F> {
        fn new(fps: u32, len: u64, color: F) -> Self {
            Self {
                fps,
                len,
                next: 0,
                color,
                fail_at: None,
            }
        }
    }

    impl<F: Fn(u64) -> [u8; 3]> FrameSource for Synthetic<F> {
        fn frame_rate(&self) -> u32 {
            self.fps
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
            if self.fail_at == Some(self.next) {
                return Err(DecodeError::Truncated { got: 1, expected: 2 });
            }
            if self.next >= self.len {
                return Ok(None);
            }
            let index = self.next;
            self.next += 1;
            Ok(Some(Frame::solid(index, W, H, (self.color)(index))))
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default()).unwrap()
    }

    fn keyframes(outcome: &DeckOutcome) -> Vec<u64> {
        match outcome {
            DeckOutcome::Slides { deck, .. } => deck.keyframes.iter().map(|k| k.frame_index).collect(),
            DeckOutcome::Empty { .. } => Vec::new(),
        }
    }

    fn alternating(index: u64) -> [u8; 3] {
        if (index / 5) % 2 == 0 {
            [10, 10, 10]
        } else {
            [240, 240, 240]
        }
    }

    /// Changes color every `period` frames, cycling through distinct grays.
    fn stepped(period: u64) -> impl Fn(u64) -> [u8; 3] {
        move |index| {
            let v = [0u8, 200, 60, 250, 120][((index / period) % 5) as usize];
            [v, v, v]
        }
    }

    #[test]
    fn static_video_yields_one_keyframe() {
        let mut source = Synthetic::new(30, 300, |_| [90, 120, 200]);
        let outcome = pipeline().run(&mut source).unwrap();
        assert_eq!(keyframes(&outcome), vec![0]);
        let DeckOutcome::Slides { deck, stats } = outcome else {
            panic!("expected slides");
        };
        assert_eq!(deck.keyframes[0].label, "00:00:00");
        assert_eq!(stats.frames_decoded, 300);
        assert_eq!(stats.frames_sampled, 100);
        assert!(deck.pdf.starts_with(b"%PDF-"));
    }

    #[test]
    fn alternating_colors_respect_elapsed_gate() {
        let mut source = Synthetic::new(30, 300, alternating);
        let indices = keyframes(&pipeline().run(&mut source).unwrap());
        assert!(indices.len() > 1, "got {indices:?}");
        assert_eq!(indices[0], 0);
        assert_eq!(indices[1], 36);
        for pair in indices.windows(2) {
            assert!(pair[1] - pair[0] > 30, "keyframes too close: {indices:?}");
        }
    }

    #[test]
    fn keyframes_are_sampled_and_strictly_increasing() {
        for stride in [1u32, 2, 3, 7] {
            let config = PipelineConfig {
                sample_stride: stride,
                ..PipelineConfig::default()
            };
            let mut source = Synthetic::new(10, 400, stepped(13));
            let outcome = Pipeline::new(config).unwrap().run(&mut source).unwrap();
            let indices = keyframes(&outcome);
            assert_eq!(indices[0], 0);
            for pair in indices.windows(2) {
                assert!(pair[0] < pair[1]);
                assert!(pair[1] - pair[0] > 10, "stride {stride}: {indices:?}");
            }
            assert!(indices.iter().all(|i| i % u64::from(stride) == 0));
        }
    }

    #[test]
    fn slide_count_matches_keyframes() {
        let mut source = Synthetic::new(10, 200, stepped(20));
        let DeckOutcome::Slides { deck, .. } = pipeline().run(&mut source).unwrap() else {
            panic!("expected slides");
        };
        let pdf = &deck.pdf;
        let needle: &[u8] = b"/DCTDecode";
        let pages = pdf.windows(needle.len()).filter(|w| *w == needle).count();
        assert!(deck.keyframes.len() > 1);
        assert_eq!(pages, deck.keyframes.len());
        let stamps: Vec<u64> = deck.keyframes.iter().map(|k| k.timestamp_secs).collect();
        assert!(stamps.windows(2).all(|p| p[0] <= p[1]));
    }

    #[test]
    fn runs_are_idempotent() {
        let run = || {
            let mut source = Synthetic::new(24, 500, stepped(17));
            match pipeline().run(&mut source).unwrap() {
                DeckOutcome::Slides { deck, .. } => deck,
                DeckOutcome::Empty { .. } => panic!("expected slides"),
            }
        };
        let (a, b) = (run(), run());
        assert_eq!(a.keyframes, b.keyframes);
        assert_eq!(a.pdf, b.pdf);
    }

    #[test]
    fn label_colors_follow_frame_brightness() {
        let mut source = Synthetic::new(10, 100, |i| if i < 50 { [5, 5, 5] } else { [230, 230, 230] });
        let DeckOutcome::Slides { deck, .. } = pipeline().run(&mut source).unwrap() else {
            panic!("expected slides");
        };
        let colors: Vec<LabelColor> = deck.keyframes.iter().map(|k| k.color).collect();
        assert_eq!(colors, vec![LabelColor::Light, LabelColor::Dark]);
        assert_eq!(deck.keyframes[1].frame_index, 51);
        assert_eq!(deck.keyframes[1].label, "00:00:05");
    }

    #[test]
    fn empty_stream_is_explicit_empty_outcome() {
        let mut source = Synthetic::new(30, 0, |_| [0, 0, 0]);
        let outcome = pipeline().run(&mut source).unwrap();
        assert!(matches!(outcome, DeckOutcome::Empty { .. }));
        assert_eq!(outcome.stats().frames_decoded, 0);
    }

    #[test]
    fn short_video_yields_only_first_keyframe() {
        let mut source = Synthetic::new(30, 20, alternating);
        assert_eq!(keyframes(&pipeline().run(&mut source).unwrap()), vec![0]);
    }

    #[test]
    fn zero_fps_uses_gate_of_one() {
        let config = PipelineConfig {
            sample_stride: 1,
            ..PipelineConfig::default()
        };
        let mut source = Synthetic::new(0, 12, |i| if i % 2 == 0 { [0, 0, 0] } else { [255, 255, 255] });
        let outcome = Pipeline::new(config).unwrap().run(&mut source).unwrap();
        assert_eq!(keyframes(&outcome), vec![0, 2, 4, 6, 8, 10]);
        let DeckOutcome::Slides { deck, stats } = outcome else {
            panic!("expected slides");
        };
        assert_eq!(stats.fps, 0);
        assert_eq!(deck.keyframes[3].timestamp_secs, 6);
    }

    #[test]
    fn decode_error_aborts_run() {
        let mut source = Synthetic::new(30, 300, alternating);
        source.fail_at = Some(100);
        let err = pipeline().run(&mut source).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(DecodeError::Truncated { .. })));
    }

    #[test]
    fn cancelled_token_stops_before_decoding() {
        let token = CancelToken::new();
        let pipeline = pipeline().with_cancel(token.clone());
        token.cancel();
        let mut source = Synthetic::new(30, 300, |_| [0, 0, 0]);
        let err = pipeline.run(&mut source).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { frames: 0 }));
        assert_eq!(source.next, 0);
    }

    #[test]
    fn zero_budget_stops_the_run() {
        let pipeline = pipeline().with_budget(Duration::ZERO);
        let mut source = Synthetic::new(30, 300, |_| [0, 0, 0]);
        let err = pipeline.run(&mut source).unwrap_err();
        assert!(matches!(err, PipelineError::DeadlineExceeded { .. }));
    }

    #[test]
    fn invalid_config_rejected_before_processing() {
        let config = PipelineConfig {
            similarity_threshold: 2.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(Pipeline::new(config), Err(PipelineError::Config(_))));
    }
}
