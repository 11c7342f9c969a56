//! Common depth source types and traits.

use image::{ImageBuffer, Luma};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Single-channel depth image, one sample per pixel in sensor depth units.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Errors that can occur during depth acquisition.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to read depth manifest {path}: {source}")]
    ManifestUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed depth manifest {path} at line {line}: {reason}")]
    ManifestMalformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Failed to decode depth frame {path}: {reason}")]
    FrameDecodeFailed { path: PathBuf, reason: String },

    #[error("Camera subsystem initialization failed: {0}")]
    DeviceInitFailed(String),

    #[error("Failed to open camera device: {0}")]
    DeviceOpenFailed(String),

    #[error("Failed to create depth stream: {0}")]
    StreamCreateFailed(String),

    #[error("Failed to start depth stream: {0}")]
    StreamStartFailed(String),

    #[error("No frame from depth stream: {0}")]
    StreamWaitFailed(String),

    #[error("Invalid depth frame: {0}")]
    FrameInvalid(String),
}

/// How a source acquires its frames. Fixed for the lifetime of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Replay of a recorded sequence listed in a manifest.
    FileReplay,
    /// Frames pulled from a live depth sensor.
    LiveCamera,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::FileReplay => write!(f, "file replay"),
            AcquisitionMode::LiveCamera => write!(f, "live camera"),
        }
    }
}

/// A depth frame produced by a source.
///
/// The frame owns its samples; handing it on never aliases a driver buffer.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    /// Depth samples.
    pub image: DepthImage,
    /// Capture timestamp in seconds, if the source knows one.
    pub timestamp: Option<f64>,
    /// Frame number (1-based, per source).
    pub frame_number: u64,
}

impl DepthFrame {
    /// Create a new frame.
    pub fn new(image: DepthImage, timestamp: Option<f64>, frame_number: u64) -> Self {
        Self {
            image,
            timestamp,
            frame_number,
        }
    }

    /// Get image dimensions (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        let (width, height) = self.dimensions();
        width == 0 || height == 0
    }
}

/// Trait for sources that provide depth frames.
///
/// `Ok(None)` signals end of stream. Replay sources are finite and stay
/// exhausted once they return `None`; live sources never end on their own.
pub trait DepthSource {
    /// Get the next frame from the source, blocking until one is available.
    fn next_frame(&mut self) -> Result<Option<DepthFrame>, CaptureError>;

    /// How this source acquires frames.
    fn mode(&self) -> AcquisitionMode;
}

impl<S: DepthSource + ?Sized> DepthSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<DepthFrame>, CaptureError> {
        (**self).next_frame()
    }

    fn mode(&self) -> AcquisitionMode {
        (**self).mode()
    }
}
