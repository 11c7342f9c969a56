//! The reconstruction control loop.
//!
//! One iteration acquires one frame, mirrors and tone-maps it, then depending
//! on the run mode either fuses it, shows it as a pseudo-coloured preview, or
//! (when paused) skips acquisition and hands control to an interactive viewer
//! session. Every iteration ends by presenting an image with a status line and
//! polling one key.

use super::timing::{Clock, FpsCounter, MonotonicClock};
use super::trajectory::CameraTrajectory;
use crate::engine::{FusionEngine, SurfaceCloud};
use crate::preview;
use crate::viz::{Color, Display, MouseEvent, Viewer, Widget};
use depthfuse_capture::{CaptureError, DepthFrame, DepthSource};
use glam::{Affine3A, Vec3};
use image::RgbImage;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CLOUD_WIDGET: &str = "cloud";
pub const TRACE_WIDGET: &str = "camera_trace";
pub const CAMERA_WIDGET: &str = "camera";
pub const CUBE_WIDGET: &str = "cube";
pub const TEXT_WIDGET: &str = "text";

const COMMAND_HINT: &str = "press R to reset, P to pause, Q to quit";
const PAUSE_HINT: &str = "Move camera in this window. Close the window or press Q to resume";
const CAMERA_MARKER_SCALE: f32 = 0.25;
const VIEWER_TICK: Duration = Duration::from_millis(1);

/// Errors that end the loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Acquisition failed: {0}")]
    Capture(#[from] CaptureError),
}

/// What each iteration does with its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Frames are fused.
    Running,
    /// The next iteration runs an interactive viewer session instead of
    /// acquiring, then returns to `Running`.
    Paused,
    /// Fusion is disabled for the whole run; frames are only previewed.
    IdlePreview,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Running => write!(f, "Running"),
            RunMode::Paused => write!(f, "Paused"),
            RunMode::IdlePreview => write!(f, "Idle preview"),
        }
    }
}

/// Interactive keyboard commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Reset,
    Pause,
    Quit,
}

impl KeyCommand {
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'r' => Some(KeyCommand::Reset),
            'p' => Some(KeyCommand::Pause),
            'q' => Some(KeyCommand::Quit),
            _ => None,
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The source ran out of frames.
    Exhausted,
    /// The user quit.
    Quit,
}

/// Counters kept across the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub fusion_updates: u64,
    pub fusion_failures: u64,
    pub manual_resets: u64,
    pub pauses: u64,
}

/// Drives frames from a source through a fusion engine and presents the result.
///
/// Everything here runs on the calling thread. The engine sees at most one
/// frame at a time, in acquisition order.
pub struct ReconstructionLoop<S, E, V, D, C = MonotonicClock> {
    source: S,
    engine: E,
    viewer: V,
    display: D,
    clock: C,
    fps: FpsCounter,
    last_fps: f64,
    mode: RunMode,
    trajectory: CameraTrajectory,
    camera_marker: Widget,
    max_depth: f32,
    key_timeout: Duration,
    last_display: Option<RgbImage>,
    stats: LoopStats,
}

impl<S, E, V, D> ReconstructionLoop<S, E, V, D, MonotonicClock>
where
    S: DepthSource,
    E: FusionEngine,
    V: Viewer,
    D: Display,
{
    pub fn new(source: S, engine: E, viewer: V, display: D) -> Self {
        Self::with_clock(source, engine, viewer, display, MonotonicClock::new())
    }
}

impl<S, E, V, D, C> ReconstructionLoop<S, E, V, D, C>
where
    S: DepthSource,
    E: FusionEngine,
    V: Viewer,
    D: Display,
    C: Clock,
{
    /// Create a loop measuring frame rate with `clock`.
    pub fn with_clock(source: S, engine: E, mut viewer: V, display: D, clock: C) -> Self {
        viewer.set_viewer_pose(Affine3A::IDENTITY);
        let camera_marker = Widget::CameraPosition {
            intrinsics: engine.params().intrinsics,
            scale: CAMERA_MARKER_SCALE,
            color: Color::RED,
        };
        let fps = FpsCounter::new(&clock);

        Self {
            source,
            engine,
            viewer,
            display,
            clock,
            fps,
            last_fps: 0.0,
            mode: RunMode::Running,
            trajectory: CameraTrajectory::new(),
            camera_marker,
            max_depth: preview::DEFAULT_MAX_DEPTH,
            key_timeout: Duration::from_millis(1),
            last_display: None,
            stats: LoopStats::default(),
        }
    }

    /// Disable fusion for the whole run and only preview raw depth.
    pub fn idle_preview(mut self, enabled: bool) -> Self {
        self.mode = if enabled {
            RunMode::IdlePreview
        } else {
            RunMode::Running
        };
        self
    }

    /// Depth (sensor units) shown at full brightness in the preview.
    pub fn with_max_depth(mut self, max_depth: f32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// How long each iteration waits for a key.
    pub fn with_key_timeout(mut self, timeout: Duration) -> Self {
        self.key_timeout = timeout;
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn trajectory(&self) -> &CameraTrajectory {
        &self.trajectory
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn viewer(&self) -> &V {
        &self.viewer
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Run until the source is exhausted or the user quits.
    ///
    /// Acquisition errors end the run; fusion failures never do.
    pub fn run(&mut self) -> Result<LoopExit, LoopError> {
        info!(
            "Reconstruction loop started ({}, {} source)",
            self.mode,
            self.source.mode()
        );

        loop {
            if let Some(exit) = self.step()? {
                info!(
                    "Reconstruction loop finished ({:?}): {} frames, {} fused, {} failed, trajectory {} poses over {:.3} m",
                    exit,
                    self.stats.frames,
                    self.stats.fusion_updates,
                    self.stats.fusion_failures,
                    self.trajectory.len(),
                    self.trajectory.path_length()
                );
                return Ok(exit);
            }
        }
    }

    /// Run one iteration. Returns `Some` when the loop should stop.
    pub fn step(&mut self) -> Result<Option<LoopExit>, LoopError> {
        let resumed = self.mode == RunMode::Paused;
        let image = if resumed {
            self.pause_session();
            self.last_display
                .take()
                .unwrap_or_else(|| self.blank_image())
        } else {
            let Some(mut frame) = self.source.next_frame()? else {
                info!("Depth source exhausted");
                return Ok(Some(LoopExit::Exhausted));
            };
            self.stats.frames += 1;

            preview::mirror(&mut frame.image);
            let tone_mapped = preview::tone_map(&frame.image, self.max_depth);

            if self.mode == RunMode::IdlePreview {
                preview::apply_color_map(&tone_mapped)
            } else {
                self.fuse(&frame)
            }
        };

        // The paused iteration repeats the last rate; measurement restarts
        // from here so the session length never reaches the counter.
        if resumed {
            self.fps.rearm(&self.clock);
        } else {
            self.last_fps = self.fps.tick(&self.clock);
        }
        let status = format!("FPS: {:2} {}", self.last_fps as i64, COMMAND_HINT);
        self.display.show(&image, &status);
        self.last_display = Some(image);

        let command = self
            .display
            .poll_key(self.key_timeout)
            .and_then(KeyCommand::from_key);

        match command {
            Some(KeyCommand::Reset) if self.mode != RunMode::IdlePreview => {
                self.engine.reset();
                self.stats.manual_resets += 1;
                info!("Reset requested, fusion volume cleared");
            }
            Some(KeyCommand::Pause) if self.mode != RunMode::IdlePreview => {
                self.mode = RunMode::Paused;
                debug!("Pause requested");
            }
            Some(KeyCommand::Quit) => {
                info!("Quit requested");
                return Ok(Some(LoopExit::Quit));
            }
            _ => {}
        }

        Ok(None)
    }

    fn fuse(&mut self, frame: &DepthFrame) -> RgbImage {
        if !self.engine.update(&frame.image) {
            self.engine.reset();
            self.stats.fusion_failures += 1;
            warn!(
                "Fusion update failed on frame {}, engine reset",
                frame.frame_number
            );
        } else {
            self.stats.fusion_updates += 1;
            let cloud = self.engine.cloud();
            let pose = self.engine.pose();
            self.trajectory.push(pose.transform_point3(Vec3::ZERO));

            if !cloud.is_empty() {
                self.refresh_scene(cloud, pose);
            }
        }

        self.engine.render(None)
    }

    fn refresh_scene(&mut self, cloud: SurfaceCloud, pose: Affine3A) {
        self.viewer.show_widget(
            CLOUD_WIDGET,
            Widget::Cloud {
                points: cloud.points,
                color: Color::WHITE,
            },
            None,
        );
        self.viewer.show_widget(
            TRACE_WIDGET,
            Widget::PolyLine {
                points: self.trajectory.points().to_vec(),
                color: Color::GREEN,
            },
            None,
        );
        self.viewer
            .show_widget(CAMERA_WIDGET, self.camera_marker.clone(), Some(pose));
        self.show_volume();

        self.viewer.spin_once(VIEWER_TICK, true);
    }

    fn show_volume(&mut self) {
        let params = self.engine.params();
        let cube = Widget::Cube {
            min: Vec3::ZERO,
            max: params.volume_extent(),
        };
        let volume_pose = params.volume_pose;
        self.viewer.show_widget(CUBE_WIDGET, cube, Some(volume_pose));
    }

    fn pause_session(&mut self) {
        self.stats.pauses += 1;
        let cloud = self.engine.cloud();

        if !cloud.is_empty() {
            info!("Paused with {} surface points", cloud.len());
            self.viewer.show_widget(
                CLOUD_WIDGET,
                Widget::Cloud {
                    points: cloud.points,
                    color: Color::WHITE,
                },
                None,
            );
            self.show_volume();
            self.viewer.show_widget(
                TEXT_WIDGET,
                Widget::Text {
                    text: PAUSE_HINT.to_string(),
                },
                None,
            );

            let engine = &self.engine;
            let display = &mut self.display;
            self.viewer
                .spin(&mut |event: &MouseEvent, view_pose: &Affine3A| {
                    if event.moves_view() {
                        let snapshot = engine.render(Some(view_pose));
                        display.show(&snapshot, "Paused");
                    }
                });

            self.viewer.remove_widget(TEXT_WIDGET);
            self.viewer.remove_widget(CLOUD_WIDGET);
        } else {
            info!("Nothing reconstructed yet, resuming");
        }

        self.mode = RunMode::Running;
        info!("Resumed");
    }

    fn blank_image(&self) -> RgbImage {
        let size = self.engine.params().frame_size;
        RgbImage::new(size.x, size.y)
    }
}
