//! Wiring from command line to reconstruction loop.

use crate::config::{self, ConfigError};
use crate::terminal::{self, TerminalDisplay, TerminalSession, TerminalViewer};
use depthfuse_capture::{CaptureError, DepthSource, FileReplay};
use depthfuse_recon::{
    BackProjectionEngine, CameraTrajectory, LoopError, LoopExit, LoopStats, Preset,
    ReconstructionLoop,
};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error("Terminal error: {0}")]
    Terminal(#[source] std::io::Error),

    #[error("No camera driver available; rebuild with the `uvc` feature")]
    NoCameraDriver,
}

/// Options gathered from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub depth: Option<PathBuf>,
    pub camera: bool,
    pub coarse: bool,
    pub idle: bool,
    pub color: bool,
    pub config: Option<PathBuf>,
    pub dump_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl RunOptions {
    pub fn preset(&self) -> Preset {
        if self.coarse {
            Preset::Coarse
        } else {
            Preset::Default
        }
    }
}

/// Where frames come from, in order of precedence.
#[derive(Debug, Clone, PartialEq)]
enum SourceChoice {
    Camera,
    Replay(PathBuf),
    Empty,
}

fn choose_source(options: &RunOptions) -> SourceChoice {
    if options.camera {
        SourceChoice::Camera
    } else if let Some(path) = &options.depth {
        SourceChoice::Replay(path.clone())
    } else {
        SourceChoice::Empty
    }
}

fn open_source(choice: SourceChoice) -> Result<Box<dyn DepthSource>, AppError> {
    match choice {
        SourceChoice::Camera => open_camera(),
        SourceChoice::Replay(path) => Ok(Box::new(FileReplay::from_manifest(path)?)),
        SourceChoice::Empty => Ok(Box::new(FileReplay::from_manifest("")?)),
    }
}

#[cfg(feature = "uvc")]
fn open_camera() -> Result<Box<dyn DepthSource>, AppError> {
    use depthfuse_capture::{LiveCamera, UvcDriver};
    Ok(Box::new(LiveCamera::new(UvcDriver::new())?))
}

#[cfg(not(feature = "uvc"))]
fn open_camera() -> Result<Box<dyn DepthSource>, AppError> {
    Err(AppError::NoCameraDriver)
}

fn init_logging(level: &str, enable_tracy: bool) {
    #[cfg(feature = "tracy")]
    {
        if enable_tracy {
            use tracing_subscriber::Layer;
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;
            tracing_subscriber::registry()
                .with(tracing_tracy::TracyLayer::default())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(terminal::log_writer)
                        .with_filter(
                            tracing_subscriber::EnvFilter::try_from_default_env()
                                .unwrap_or_else(|_| level.into()),
                        ),
                )
                .init();
            return;
        }
    }
    #[cfg(not(feature = "tracy"))]
    let _ = enable_tracy;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(terminal::log_writer)
        .with_target(false)
        .init();
}

pub fn run(options: RunOptions) -> Result<(), AppError> {
    let mut cfg = config::load(options.config.as_deref())?;
    if let Some(level) = &options.log_level {
        cfg.logging.level = level.clone();
    }
    init_logging(&cfg.logging.level, cfg.logging.enable_tracy);

    if options.color {
        warn!("Colour streams are not supported, ignoring --color");
    }

    let preset = options.preset();
    let choice = choose_source(&options);
    info!("Preset {}, source {:?}", preset, choice);

    let source = open_source(choice)?;
    let mode = source.mode();
    let engine = BackProjectionEngine::new(cfg.fusion_params(preset));

    let session = TerminalSession::start().map_err(AppError::Terminal)?;
    let dump_dir = options.dump_dir.clone().or(cfg.preview.dump_dir.clone());
    let display = TerminalDisplay::new(dump_dir).map_err(AppError::Terminal)?;

    let mut recon = ReconstructionLoop::new(source, engine, TerminalViewer::new(), display)
        .idle_preview(options.idle)
        .with_max_depth(cfg.preview.max_depth)
        .with_key_timeout(Duration::from_millis(cfg.preview.key_poll_ms));

    info!("Acquiring from {}", mode);
    let outcome = recon.run();
    drop(session);

    let exit = outcome?;
    let stats = recon.stats();
    match exit {
        LoopExit::Exhausted => info!("Source exhausted"),
        LoopExit::Quit => info!("Quit requested"),
    }
    info!(
        "{}",
        exit_summary(&stats, recon.trajectory(), recon.display().presented())
    );
    Ok(())
}

fn exit_summary(stats: &LoopStats, trajectory: &CameraTrajectory, presented: u64) -> String {
    format!(
        "{} frames, {} fused, {} fusion failures, {} manual resets, {} pauses, {} images presented, camera path {:.3} m over {} poses",
        stats.frames,
        stats.fusion_updates,
        stats.fusion_failures,
        stats.manual_resets,
        stats.pauses,
        presented,
        trajectory.path_length(),
        trajectory.len()
    )
}
