//! Depthfuse
//!
//! Interactive depth fusion from a recorded sequence or a live camera.
//!
//! Keys while running:
//! - `r` resets the reconstruction
//! - `p` pauses and opens the viewer (Esc or `q` resumes)
//! - `q` quits

mod app;
mod config;
mod terminal;

use clap::Parser;
use std::path::PathBuf;

/// Depthfuse - Real-time Depth Fusion
#[derive(Parser, Debug)]
#[command(name = "depthfuse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Manifest listing recorded depth frames ("timestamp path" per line)
    #[arg(long, value_name = "PATH")]
    depth: Option<PathBuf>,

    /// Stream from a live depth camera (takes precedence over --depth)
    #[arg(long)]
    camera: bool,

    /// Use the coarse preset (smaller volume, fewer iterations)
    #[arg(long)]
    coarse: bool,

    /// Only preview raw depth, without reconstruction
    #[arg(long)]
    idle: bool,

    /// Request a colour stream (not supported, ignored)
    #[arg(long)]
    color: bool,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write every presented image to this directory as PNG
    #[arg(long, value_name = "DIR")]
    dump_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (overrides the config file)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl From<Args> for app::RunOptions {
    fn from(args: Args) -> Self {
        Self {
            depth: args.depth,
            camera: args.camera,
            coarse: args.coarse,
            idle: args.idle,
            color: args.color,
            config: args.config,
            dump_dir: args.dump_dir,
            log_level: args.log_level,
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = app::run(args.into()) {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
