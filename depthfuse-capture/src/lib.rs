//! Depthfuse Capture - Depth frame acquisition
//!
//! This crate provides implementations of the [`DepthSource`] trait for
//! pulling single-channel 16-bit depth frames from:
//!
//! - Recorded sequences listed in a manifest file ([`FileReplay`])
//! - Live depth cameras behind a [`DepthDriver`] ([`LiveCamera`])
//! - UVC depth cameras (via nokhwa, requires `uvc` feature)
//!
//! ## Example
//!
//! ```ignore
//! use depthfuse_capture::{DepthSource, FileReplay};
//!
//! let mut source = FileReplay::from_manifest("data/depth.txt")?;
//! while let Some(frame) = source.next_frame()? {
//!     // Process frame...
//! }
//! ```

mod live;
mod replay;
mod source;

#[cfg(feature = "uvc")]
mod uvc;

pub use live::{
    CameraSubsystem, DepthDevice, DepthDriver, DepthStream, DeviceUri, DriverError, DriverFrame,
    LiveCamera,
};
pub use replay::{FileReplay, ManifestEntry, parse_manifest};
pub use source::{AcquisitionMode, CaptureError, DepthFrame, DepthImage, DepthSource};

#[cfg(feature = "uvc")]
pub use uvc::UvcDriver;
