//! Face landmark types and the landmark source seam.
//!
//! The detector itself is external. It produces one [`FaceLandmarks`] per
//! frame in normalized image coordinates, using the face mesh index scheme in
//! [`crate::constants`].

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, path::Path};

/// One normalized landmark, x and y in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkPoint {
    /// Horizontal position, 0 at the left image edge
    pub x: f64,
    /// Vertical position, 0 at the top image edge
    pub y: f64,
    /// Relative depth, when the detector provides it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl LandmarkPoint {
    /// Create a point without depth
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    /// Convert to pixel coordinates of a frame
    #[must_use]
    pub fn to_pixels(self, frame_width: u32, frame_height: u32) -> (f64, f64) {
        (self.x * f64::from(frame_width), self.y * f64::from(frame_height))
    }
}

/// Landmarks of the single tracked face in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    /// Landmarks in face mesh order
    pub points: Vec<LandmarkPoint>,
    /// Frame width in pixels
    pub frame_width: u32,
    /// Frame height in pixels
    pub frame_height: u32,
    /// Capture timestamp in milliseconds
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl FaceLandmarks {
    /// Landmark at `index`, if the detector produced it
    #[must_use]
    pub fn get(&self, index: usize) -> Option<LandmarkPoint> {
        self.points.get(index).copied()
    }

    /// Landmark at `index` in pixel coordinates
    #[must_use]
    pub fn pixel(&self, index: usize) -> Option<(f64, f64)> {
        self.get(index).map(|p| p.to_pixels(self.frame_width, self.frame_height))
    }
}

/// External face landmark detector.
///
/// `Ok(None)` means no face was found in the frame. Calls must not overlap:
/// the caller drops new frames while a detection is still pending.
#[async_trait]
pub trait LandmarkSource: Send {
    /// Detect landmarks in the next available frame
    async fn detect_landmarks(&mut self) -> Result<Option<FaceLandmarks>>;
}

/// Recorded landmark frames, `None` entries are frames without a face
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandmarkRecording {
    /// Frames in capture order
    pub frames: Vec<Option<FaceLandmarks>>,
}

impl LandmarkRecording {
    /// Load a recording from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| Error::InvalidInput(format!("Invalid landmark recording: {e}")))
    }

    /// Save the recording as YAML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

/// Landmark source replaying queued frames in order
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<Option<FaceLandmarks>>,
}

impl ReplaySource {
    /// Create a source from frames in playback order
    #[must_use]
    pub fn new(frames: Vec<Option<FaceLandmarks>>) -> Self {
        Self { frames: frames.into() }
    }

    /// Append a frame to the end of the queue
    pub fn push(&mut self, frame: Option<FaceLandmarks>) {
        self.frames.push_back(frame);
    }

    /// Frames left to replay
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl From<LandmarkRecording> for ReplaySource {
    fn from(recording: LandmarkRecording) -> Self {
        Self::new(recording.frames)
    }
}

#[async_trait]
impl LandmarkSource for ReplaySource {
    async fn detect_landmarks(&mut self) -> Result<Option<FaceLandmarks>> {
        Ok(self.frames.pop_front().flatten())
    }
}
