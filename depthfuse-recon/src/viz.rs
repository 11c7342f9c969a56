//! Visualization and display contracts.
//!
//! The reconstruction loop talks to two surfaces: a 3D [`Viewer`] holding
//! named widgets, and a 2D [`Display`] that shows the per-frame image and
//! delivers keystrokes.

use crate::params::Intrinsics;
use glam::{Affine3A, Vec3};
use image::RgbImage;
use std::time::Duration;

/// 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const WHITE: Color = Color([255, 255, 255]);
    pub const GREEN: Color = Color([0, 255, 0]);
    pub const RED: Color = Color([255, 0, 0]);
}

/// Something a [`Viewer`] can draw.
#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    /// Surface point cloud.
    Cloud { points: Vec<Vec3>, color: Color },
    /// Connected line through the points, in order.
    PolyLine { points: Vec<Vec3>, color: Color },
    /// Camera frustum marker.
    CameraPosition {
        intrinsics: Intrinsics,
        scale: f32,
        color: Color,
    },
    /// Axis-aligned wireframe box in the widget's local frame.
    Cube { min: Vec3, max: Vec3 },
    /// Screen-space text.
    Text { text: String },
}

impl Widget {
    pub fn kind(&self) -> &'static str {
        match self {
            Widget::Cloud { .. } => "cloud",
            Widget::PolyLine { .. } => "polyline",
            Widget::CameraPosition { .. } => "camera",
            Widget::Cube { .. } => "cube",
            Widget::Text { .. } => "text",
        }
    }
}

/// Pointer input delivered during an interactive viewer session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MouseEvent {
    Moved { x: f32, y: f32 },
    ScrollUp,
    ScrollDown,
    ButtonDown,
    ButtonUp,
}

impl MouseEvent {
    /// Whether the event changes what the viewer looks at.
    pub fn moves_view(&self) -> bool {
        matches!(
            self,
            MouseEvent::Moved { .. } | MouseEvent::ScrollUp | MouseEvent::ScrollDown
        )
    }
}

/// 3D scene surface.
pub trait Viewer {
    /// Add or replace a named widget, optionally placed at `pose`.
    fn show_widget(&mut self, name: &str, widget: Widget, pose: Option<Affine3A>);

    fn remove_widget(&mut self, name: &str);

    /// Process pending events for at most `duration` without blocking further.
    fn spin_once(&mut self, duration: Duration, force_redraw: bool);

    /// Run a modal interaction session until the user dismisses it.
    ///
    /// `on_mouse` receives each pointer event with the viewer pose after the
    /// event was applied. It is only called while the session runs.
    fn spin(&mut self, on_mouse: &mut dyn FnMut(&MouseEvent, &Affine3A));

    /// Current camera pose of the viewer.
    fn viewer_pose(&self) -> Affine3A;

    fn set_viewer_pose(&mut self, pose: Affine3A);
}

/// 2D image surface with keyboard input.
pub trait Display {
    /// Present an image with a status line drawn over it.
    fn show(&mut self, image: &RgbImage, status: &str);

    /// Wait up to `timeout` for a key press.
    fn poll_key(&mut self, timeout: Duration) -> Option<char>;
}
