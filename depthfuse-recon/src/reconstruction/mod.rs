//! Reconstruction control loop
//!
//! This module sequences frame acquisition, fusion, failure recovery,
//! trajectory bookkeeping and presentation.

pub mod control;
pub mod timing;
pub mod trajectory;

pub use control::{KeyCommand, LoopError, LoopExit, LoopStats, ReconstructionLoop, RunMode};
pub use timing::{Clock, FpsCounter, MonotonicClock};
pub use trajectory::CameraTrajectory;
