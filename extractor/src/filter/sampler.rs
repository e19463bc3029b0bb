use tracing::trace;

/// Stateless stride filter over decoded frame indices.
///
/// Frames between sample points are never scored; the caller drops them as
/// soon as [`Sampler::admits`] returns `false`.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    stride: u64,
}

impl Sampler {
    /// A stride of zero is treated as one.
    pub fn new(stride: u32) -> Self {
        Self {
            stride: u64::from(stride.max(1)),
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn admits(&self, index: u64) -> bool {
        let admitted = index % self.stride == 0;
        if !admitted {
            trace!(index, stride = self.stride, "frame skipped by sampler");
        }
        admitted
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(3)
    }
}
