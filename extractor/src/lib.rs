//! Video to slide-deck conversion.
//!
//! A single forward pass over the decoded frames:
//! 1. stride sampling ([`filter::Sampler`])
//! 2. grayscale thumbnail similarity ([`filter::Thumbnail`])
//! 3. keyframe selection gated by elapsed frames ([`selector::KeyframeSelector`])
//! 4. per-keyframe page composition ([`render::SlideRenderer`])
//! 5. PDF assembly ([`assembler::DocumentAssembler`])

pub mod assembler;
pub mod filter;
pub mod pipeline;
pub mod render;
pub mod selector;
pub mod source;

pub use pipeline::{CancelToken, Deck, DeckOutcome, Pipeline, PipelineError, RunStats};
pub use source::{DecodeError, FfmpegSource, FrameSource};
