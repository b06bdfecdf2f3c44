use crate::error::{VignetteError, VignetteResult};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRange {
    pub start: FrameIndex,
    pub end: FrameIndex, // exclusive
}

impl FrameRange {
    pub fn new(start: FrameIndex, end: FrameIndex) -> VignetteResult<Self> {
        if start.0 > end.0 {
            return Err(VignetteError::validation("FrameRange start must be <= end"));
        }
        Ok(Self { start, end })
    }

    pub fn len_frames(self) -> u64 {
        self.end.0.saturating_sub(self.start.0)
    }

    pub fn is_empty(self) -> bool {
        self.start.0 == self.end.0
    }

    pub fn contains(self, f: FrameIndex) -> bool {
        self.start.0 <= f.0 && f.0 < self.end.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> VignetteResult<Self> {
        if den == 0 {
            return Err(VignetteError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(VignetteError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    pub fn frames_to_secs(self, frame: u64) -> f64 {
        (frame as f64) / self.as_f64()
    }
}

impl Default for Fps {
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> VignetteResult<Self> {
        if width == 0 || height == 0 {
            return Err(VignetteError::validation("Canvas width/height must be > 0"));
        }
        Ok(Self { width, height })
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_range_basics() {
        let r = FrameRange::new(FrameIndex(5), FrameIndex(15)).unwrap();
        assert_eq!(r.len_frames(), 10);
        assert!(r.contains(FrameIndex(5)));
        assert!(r.contains(FrameIndex(14)));
        assert!(!r.contains(FrameIndex(15)));
        assert!(FrameRange::new(FrameIndex(3), FrameIndex(2)).is_err());
    }

    #[test]
    fn fps_rejects_zero() {
        assert!(Fps::new(0, 1).is_err());
        assert!(Fps::new(30, 0).is_err());
        assert_eq!(Fps::new(30, 1).unwrap().as_f64(), 30.0);
    }

    #[test]
    fn fps_frames_to_secs() {
        let fps = Fps::new(30, 1).unwrap();
        assert_eq!(fps.frames_to_secs(30), 1.0);
        assert_eq!(fps.frames_to_secs(45), 1.5);
    }

    #[test]
    fn canvas_rejects_zero() {
        assert!(Canvas::new(0, 720).is_err());
        assert!(Canvas::new(1280, 0).is_err());
    }
}
