//! Fusion engine contract
//!
//! A fusion engine integrates depth frames into a persistent surface model and
//! tracks the camera pose. The reconstruction loop only relies on this trait;
//! TSDF / ICP engines plug in by implementing it.

pub mod backproject;

pub use backproject::BackProjectionEngine;

use crate::params::FusionParams;
use depthfuse_capture::DepthImage;
use glam::{Affine3A, Vec3};
use image::RgbImage;

/// Surface points with per-point normals, in world space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceCloud {
    pub points: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

impl SurfaceCloud {
    pub fn new(points: Vec<Vec3>, normals: Vec<Vec3>) -> Self {
        Self { points, normals }
    }

    /// A cloud is drawable only with both points and normals.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() || self.normals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Volumetric fusion engine.
pub trait FusionEngine {
    /// Integrate a depth frame. Returns `false` when the frame could not be
    /// integrated, e.g. tracking was lost. The engine copies what it keeps.
    fn update(&mut self, depth: &DepthImage) -> bool;

    /// Discard the volume and return the pose to the origin.
    fn reset(&mut self);

    /// Current surface.
    fn cloud(&self) -> SurfaceCloud;

    /// Current camera-to-world pose estimate.
    fn pose(&self) -> Affine3A;

    /// Shade the surface as seen from `view`, or from the tracked pose.
    fn render(&self, view: Option<&Affine3A>) -> RgbImage;

    fn params(&self) -> &FusionParams;
}
