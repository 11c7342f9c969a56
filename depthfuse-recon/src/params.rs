//! Fusion engine parameters.

use glam::{Affine3A, UVec2, UVec3, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pinhole camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Back-project pixel `(u, v)` at depth `z` (metres) into camera space.
    pub fn unproject(&self, u: f32, v: f32, z: f32) -> Vec3 {
        Vec3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }

    /// Project a camera-space point to pixel coordinates. `None` behind the camera.
    pub fn project(&self, point: Vec3) -> Option<Vec2> {
        if point.z <= f32::EPSILON {
            return None;
        }
        Some(Vec2::new(
            self.fx * point.x / point.z + self.cx,
            self.fy * point.y / point.z + self.cy,
        ))
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::new(525.0, 525.0, 319.5, 239.5)
    }
}

/// Integration quality preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Slower, higher fidelity integration.
    #[default]
    Default,
    /// Faster, lower fidelity integration.
    Coarse,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Default => write!(f, "default"),
            Preset::Coarse => write!(f, "coarse"),
        }
    }
}

/// Parameters fixed at engine construction.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionParams {
    /// Expected depth frame size (width, height).
    pub frame_size: UVec2,
    pub intrinsics: Intrinsics,
    /// Sensor depth units per metre.
    pub depth_factor: f32,
    /// Voxel grid resolution.
    pub volume_dims: UVec3,
    /// Voxel edge length in metres.
    pub voxel_size: f32,
    /// Pose of the volume's corner in world space.
    pub volume_pose: Affine3A,
    /// TSDF truncation distance in metres.
    pub tsdf_trunc_dist: f32,
    pub tsdf_max_weight: u32,
    /// Ray-cast step as a fraction of the truncation distance.
    pub raycast_step_factor: f32,
    /// ICP iterations per pyramid level, finest first.
    pub icp_iterations: Vec<u32>,
    /// Depth beyond this many metres is ignored. Zero disables the cut.
    pub truncate_threshold: f32,
}

impl FusionParams {
    /// Slow, higher fidelity preset.
    pub fn default_params() -> Self {
        let volume_size = 3.0;
        let dims = 512;
        let voxel_size = volume_size / dims as f32;

        Self {
            frame_size: UVec2::new(640, 480),
            intrinsics: Intrinsics::default(),
            depth_factor: 5000.0,
            volume_dims: UVec3::splat(dims),
            voxel_size,
            volume_pose: Affine3A::from_translation(Vec3::new(
                -volume_size / 2.0,
                -volume_size / 2.0,
                0.5,
            )),
            tsdf_trunc_dist: 7.0 * voxel_size,
            tsdf_max_weight: 64,
            raycast_step_factor: 0.25,
            icp_iterations: vec![10, 5, 4],
            truncate_threshold: 0.0,
        }
    }

    /// Fast, lower fidelity preset.
    pub fn coarse() -> Self {
        let base = Self::default_params();
        let dims = 128;
        let voxel_size = 3.0 / dims as f32;

        Self {
            volume_dims: UVec3::splat(dims),
            voxel_size,
            tsdf_trunc_dist: 2.0 * voxel_size,
            raycast_step_factor: 0.75,
            icp_iterations: vec![5, 3, 2],
            ..base
        }
    }

    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Default => Self::default_params(),
            Preset::Coarse => Self::coarse(),
        }
    }

    /// Replace the camera intrinsics.
    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    /// Replace the depth scale.
    pub fn with_depth_factor(mut self, depth_factor: f32) -> Self {
        self.depth_factor = depth_factor;
        self
    }

    /// Use a cubic volume `size_m` metres wide split into `dims` voxels per
    /// axis, centred on the optical axis and starting at the camera plane.
    pub fn with_cubic_volume(mut self, dims: u32, size_m: f32) -> Self {
        self.volume_dims = UVec3::splat(dims);
        self.voxel_size = size_m / dims as f32;
        self.volume_pose =
            Affine3A::from_translation(Vec3::new(-size_m / 2.0, -size_m / 2.0, 0.0));
        self
    }

    /// Volume edge lengths in metres.
    pub fn volume_extent(&self) -> Vec3 {
        self.volume_dims.as_vec3() * self.voxel_size
    }

    /// Whether a world-space point lies inside the volume.
    pub fn contains(&self, world: Vec3) -> bool {
        let local = self.volume_pose.inverse().transform_point3(world);
        let extent = self.volume_extent();
        local.cmpge(Vec3::ZERO).all() && local.cmple(extent).all()
    }
}

impl Default for FusionParams {
    fn default() -> Self {
        Self::default_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coarse_is_cheaper_than_default() {
        let fine = FusionParams::default_params();
        let coarse = FusionParams::coarse();

        assert!(coarse.volume_dims.x < fine.volume_dims.x);
        assert!(coarse.voxel_size > fine.voxel_size);
        assert!(coarse.icp_iterations.iter().sum::<u32>() < fine.icp_iterations.iter().sum::<u32>());
        assert_eq!(coarse.frame_size, fine.frame_size);
    }

    #[test]
    fn test_cubic_volume() {
        let params = FusionParams::default_params().with_cubic_volume(1024, 3.0);

        assert_eq!(params.volume_dims, UVec3::splat(1024));
        assert!((params.voxel_size - 3.0 / 1024.0).abs() < 1e-9);
        assert!((params.volume_extent() - Vec3::splat(3.0)).length() < 1e-4);
        assert!(params.contains(Vec3::new(0.0, 0.0, 1.0)));
        assert!(params.contains(Vec3::new(-1.4, 1.4, 2.9)));
        assert!(!params.contains(Vec3::new(0.0, 0.0, -0.1)));
        assert!(!params.contains(Vec3::new(1.6, 0.0, 1.0)));
    }

    #[test]
    fn test_project_unproject() {
        let intr = Intrinsics::new(597.0702, 595.1533, 317.4329, 240.6083);
        let point = intr.unproject(100.0, 50.0, 1.25);
        let pixel = intr.project(point).unwrap();

        assert!((pixel.x - 100.0).abs() < 1e-3);
        assert!((pixel.y - 50.0).abs() < 1e-3);
        assert!(intr.project(Vec3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(FusionParams::for_preset(Preset::Coarse), FusionParams::coarse());
        assert_eq!(Preset::default(), Preset::Default);
    }
}
