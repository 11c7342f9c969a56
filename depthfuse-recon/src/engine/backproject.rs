//! Reference engine that back-projects the latest frame.
//!
//! There is no tracking and no volumetric integration: the surface is the
//! latest frame unprojected through the intrinsics and clipped to the volume,
//! and the pose stays where it was last reset. It is enough to exercise the
//! reconstruction loop end to end.

use super::{FusionEngine, SurfaceCloud};
use crate::params::FusionParams;
use depthfuse_capture::DepthImage;
use glam::{Affine3A, Vec3};
use image::{Rgb, RgbImage};
use tracing::{debug, info};

const AMBIENT: f32 = 0.2;
const DIFFUSE: f32 = 0.8;
/// Fraction of pixels that must carry usable depth for an update to succeed.
const MIN_VALID_FRACTION: f32 = 0.05;

/// Engine that turns each depth frame into a point cloud without fusion.
pub struct BackProjectionEngine {
    params: FusionParams,
    pose: Affine3A,
    cloud: SurfaceCloud,
}

impl BackProjectionEngine {
    pub fn new(params: FusionParams) -> Self {
        info!(
            "Back-projection engine: {}x{} frames, volume {:?} m",
            params.frame_size.x,
            params.frame_size.y,
            params.volume_extent()
        );

        Self {
            params,
            pose: Affine3A::IDENTITY,
            cloud: SurfaceCloud::default(),
        }
    }

    fn world_point(&self, depth: &DepthImage, x: u32, y: u32) -> Option<Vec3> {
        let raw = depth.get_pixel(x, y).0[0];
        if raw == 0 {
            return None;
        }

        let z = f32::from(raw) / self.params.depth_factor;
        if self.params.truncate_threshold > 0.0 && z > self.params.truncate_threshold {
            return None;
        }

        let camera = self.params.intrinsics.unproject(x as f32, y as f32, z);
        let world = self.pose.transform_point3(camera);
        self.params.contains(world).then_some(world)
    }
}

impl FusionEngine for BackProjectionEngine {
    fn update(&mut self, depth: &DepthImage) -> bool {
        let (width, height) = depth.dimensions();
        if width == 0 || height == 0 {
            return false;
        }

        let grid: Vec<Option<Vec3>> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| self.world_point(depth, x, y))
            .collect();

        let valid = grid.iter().filter(|p| p.is_some()).count();
        let required = (MIN_VALID_FRACTION * (width * height) as f32).ceil() as usize;
        if valid == 0 || valid < required {
            debug!("Only {} of {} pixels usable, rejecting frame", valid, width * height);
            return false;
        }

        let eye = self.pose.transform_point3(Vec3::ZERO);
        let at = |x: u32, y: u32| grid[(y * width + x) as usize];
        let mut points = Vec::with_capacity(valid);
        let mut normals = Vec::with_capacity(valid);

        for y in 0..height.saturating_sub(1) {
            for x in 0..width.saturating_sub(1) {
                let (Some(p), Some(right), Some(down)) = (at(x, y), at(x + 1, y), at(x, y + 1))
                else {
                    continue;
                };

                let mut normal = (right - p).cross(down - p).normalize_or_zero();
                if normal == Vec3::ZERO {
                    continue;
                }
                if normal.dot(eye - p) < 0.0 {
                    normal = -normal;
                }

                points.push(p);
                normals.push(normal);
            }
        }

        self.cloud = SurfaceCloud::new(points, normals);
        true
    }

    fn reset(&mut self) {
        self.pose = Affine3A::IDENTITY;
        self.cloud = SurfaceCloud::default();
        debug!("Back-projection engine reset");
    }

    fn cloud(&self) -> SurfaceCloud {
        self.cloud.clone()
    }

    fn pose(&self) -> Affine3A {
        self.pose
    }

    fn render(&self, view: Option<&Affine3A>) -> RgbImage {
        let view = view.copied().unwrap_or(self.pose);
        let world_to_camera = view.inverse();
        let (width, height) = (self.params.frame_size.x, self.params.frame_size.y);

        let mut image = RgbImage::new(width, height);
        let mut depth_buffer = vec![f32::INFINITY; (width * height) as usize];

        for (point, normal) in self.cloud.points.iter().zip(&self.cloud.normals) {
            let camera = world_to_camera.transform_point3(*point);
            let Some(pixel) = self.params.intrinsics.project(camera) else {
                continue;
            };
            if pixel.x < 0.0 || pixel.y < 0.0 {
                continue;
            }
            let (x, y) = (pixel.x as u32, pixel.y as u32);
            if x >= width || y >= height {
                continue;
            }

            let slot = (y * width + x) as usize;
            if camera.z >= depth_buffer[slot] {
                continue;
            }
            depth_buffer[slot] = camera.z;

            let to_eye = (-camera).normalize_or_zero();
            let facing = world_to_camera.transform_vector3(*normal).dot(to_eye).max(0.0);
            let shade = ((AMBIENT + DIFFUSE * facing) * 255.0).clamp(0.0, 255.0) as u8;
            image.put_pixel(x, y, Rgb([shade, shade, shade]));
        }

        image
    }

    fn params(&self) -> &FusionParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec2;

    fn small_params() -> FusionParams {
        let mut params = FusionParams::default_params().with_cubic_volume(64, 3.0);
        params.frame_size = UVec2::new(16, 12);
        params.intrinsics = crate::params::Intrinsics::new(16.0, 16.0, 8.0, 6.0);
        params
    }

    #[test]
    fn test_flat_wall_produces_facing_normals() {
        let mut engine = BackProjectionEngine::new(small_params());
        // 1 m away at the default depth factor.
        let depth = DepthImage::from_pixel(16, 12, image::Luma([5000]));

        assert!(engine.update(&depth));
        let cloud = engine.cloud();
        assert!(!cloud.is_empty());
        assert_eq!(cloud.points.len(), cloud.normals.len());
        for (point, normal) in cloud.points.iter().zip(&cloud.normals) {
            assert!((point.z - 1.0).abs() < 1e-4);
            assert!(normal.z < -0.99);
        }
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        let mut engine = BackProjectionEngine::new(small_params());
        let depth = DepthImage::new(16, 12);

        assert!(!engine.update(&depth));
        assert!(engine.cloud().is_empty());
    }

    #[test]
    fn test_out_of_volume_depth_is_rejected() {
        let mut engine = BackProjectionEngine::new(small_params());
        // 10 m is past the 3 m volume.
        let depth = DepthImage::from_pixel(16, 12, image::Luma([50000]));

        assert!(!engine.update(&depth));
    }

    #[test]
    fn test_reset_clears_cloud() {
        let mut engine = BackProjectionEngine::new(small_params());
        let depth = DepthImage::from_pixel(16, 12, image::Luma([5000]));
        assert!(engine.update(&depth));

        engine.reset();
        assert!(engine.cloud().is_empty());
        assert_eq!(engine.pose(), Affine3A::IDENTITY);
    }

    #[test]
    fn test_render_shades_visible_surface() {
        let mut engine = BackProjectionEngine::new(small_params());
        let depth = DepthImage::from_pixel(16, 12, image::Luma([5000]));
        assert!(engine.update(&depth));

        let image = engine.render(None);
        assert_eq!(image.dimensions(), (16, 12));
        let lit = image.pixels().filter(|p| p.0[0] > 200).count();
        assert!(lit > 0);

        // Looking away from the wall shows nothing.
        let behind = Affine3A::from_rotation_y(std::f32::consts::PI);
        let image = engine.render(Some(&behind));
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
