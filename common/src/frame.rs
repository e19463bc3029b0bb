/// A decoded video frame in packed RGB24 layout.
///
/// `index` counts every decoded frame, not just the sampled ones.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl Frame {
    pub fn new(index: u64, width: u32, height: u32, rgb: Vec<u8>) -> Result<Self, FrameError> {
        let expected = Self::buffer_len(width, height);
        if rgb.len() != expected {
            return Err(FrameError::BufferSize {
                got: rgb.len(),
                expected,
            });
        }
        Ok(Self {
            index,
            width,
            height,
            rgb,
        })
    }

    /// A frame where every pixel has the same color.
    #[cfg(any(test, feature = "test-util"))]
    pub fn solid(index: u64, width: u32, height: u32, color: [u8; 3]) -> Self {
        let rgb = color
            .iter()
            .copied()
            .cycle()
            .take(Self::buffer_len(width, height))
            .collect();
        Self {
            index,
            width,
            height,
            rgb,
        }
    }

    /// Byte length of an RGB24 buffer with the given dimensions.
    pub fn buffer_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// A frame promoted to slide status.
#[derive(Debug, Clone)]
pub struct Keyframe {
    pub frame: Frame,
    pub timestamp_secs: u64,
}

impl Keyframe {
    /// `fps` of zero is treated as one.
    pub fn new(frame: Frame, fps: u32) -> Self {
        let timestamp_secs = frame.index / u64::from(fps.max(1));
        Self {
            frame,
            timestamp_secs,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame.index
    }

    pub fn label(&self) -> String {
        format_timestamp(self.timestamp_secs)
    }
}

/// Zero-padded `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_timestamp(secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp(0), "00:00:00");
        assert_eq!(format_timestamp(59), "00:00:59");
        assert_eq!(format_timestamp(61), "00:01:01");
        assert_eq!(format_timestamp(3600 + 23 * 60 + 7), "01:23:07");
        assert_eq!(format_timestamp(100 * 3600), "100:00:00");
    }

    #[test]
    fn keyframe_timestamp_floors() {
        let kf = Keyframe::new(Frame::solid(59, 2, 2, [0, 0, 0]), 30);
        assert_eq!(kf.timestamp_secs, 1);
        assert_eq!(kf.label(), "00:00:01");
        assert_eq!(kf.frame_index(), 59);
    }

    #[test]
    fn keyframe_zero_fps_treated_as_one() {
        let kf = Keyframe::new(Frame::solid(90, 2, 2, [0, 0, 0]), 0);
        assert_eq!(kf.timestamp_secs, 90);
    }

    #[test]
    fn buffer_size_checked() {
        assert!(Frame::new(0, 4, 2, vec![0; 24]).is_ok());
        let err = Frame::new(0, 4, 2, vec![0; 23]).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { got: 23, expected: 24 }));
    }

    #[test]
    fn solid_frame_fills_every_pixel() {
        let frame = Frame::solid(3, 3, 2, [10, 20, 30]);
        assert_eq!(frame.rgb.len(), 18);
        assert!(frame.rgb.chunks_exact(3).all(|p| p == [10, 20, 30]));
    }
}
