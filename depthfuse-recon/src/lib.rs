//! Depthfuse Reconstruction Crate
//!
//! This crate drives depth frames from a [`depthfuse_capture::DepthSource`]
//! through a volumetric fusion engine and presents the evolving surface and
//! camera trajectory.
//!
//! ## Modules
//!
//! - [`engine`]: The fusion engine contract and a reference back-projection engine
//! - [`params`]: Fusion parameters and the coarse / default presets
//! - [`preview`]: Mirroring, tone mapping and pseudo-colouring of raw depth
//! - [`reconstruction`]: The reconstruction control loop and its state
//! - [`viz`]: Visualization and display contracts

pub mod engine;
pub mod params;
pub mod preview;
pub mod reconstruction;
pub mod viz;

pub use engine::{BackProjectionEngine, FusionEngine, SurfaceCloud};
pub use params::{FusionParams, Intrinsics, Preset};
pub use reconstruction::{
    CameraTrajectory, Clock, FpsCounter, KeyCommand, LoopError, LoopExit, LoopStats,
    MonotonicClock, ReconstructionLoop, RunMode,
};
pub use viz::{Color, Display, MouseEvent, Viewer, Widget};
