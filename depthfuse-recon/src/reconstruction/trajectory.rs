//! Estimated camera path.

use glam::Vec3;

/// Append-only sequence of camera positions, one per successful fusion update.
#[derive(Debug, Clone, Default)]
pub struct CameraTrajectory {
    points: Vec<Vec3>,
}

impl CameraTrajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next camera position.
    pub fn push(&mut self, position: Vec3) {
        self.points.push(position);
    }

    /// Positions in the order they were recorded.
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total distance travelled along the path.
    pub fn path_length(&self) -> f32 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum()
    }
}
