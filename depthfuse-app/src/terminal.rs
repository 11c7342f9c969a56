//! Terminal front end.
//!
//! Keyboard and mouse come from crossterm in raw mode. The display prints the
//! status line in place and can dump every presented image to disk; the
//! viewer keeps the widget scene and runs the modal pause session, orbiting
//! its pose around the reconstruction volume with the mouse.

use crossterm::cursor::MoveToColumn;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEventKind,
};
use crossterm::execute;
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use depthfuse_recon::{Display, MouseEvent, Viewer, Widget};
use glam::{Affine3A, EulerRot, Quat, Vec3};
use image::RgbImage;
use std::collections::BTreeMap;
use std::io::{self, Write, stderr, stdout};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const ORBIT_MIN_DISTANCE: f32 = 0.25;
const ORBIT_STEP: f32 = 0.1;

/// Overwrite the current terminal line with `line`.
fn print_status(line: &str) {
    if let Err(e) = execute!(
        stdout(),
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(line)
    ) {
        debug!("Failed to print status: {}", e);
    }
}

/// Rewrite bare `\n` as `\r\n`, leaving existing `\r\n` alone.
fn raw_line_endings(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + 8);
    for (i, &b) in buf.iter().enumerate() {
        if b == b'\n' && (i == 0 || buf[i - 1] != b'\r') {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}

/// Log sink on stderr that stays readable while raw mode is on.
///
/// In raw mode each record first clears the in-place status line and ends
/// its lines with `\r\n`. Outside raw mode bytes pass through unchanged.
pub struct LogWriter {
    raw: bool,
    line_cleared: bool,
}

/// `MakeWriter` for the tracing subscriber.
pub fn log_writer() -> LogWriter {
    LogWriter {
        raw: terminal::is_raw_mode_enabled().unwrap_or(false),
        line_cleared: false,
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut err = stderr().lock();
        if !self.raw {
            return err.write(buf);
        }
        if !self.line_cleared {
            crossterm::queue!(err, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            self.line_cleared = true;
        }
        err.write_all(&raw_line_endings(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        stderr().flush()
    }
}

/// Raw mode and mouse capture for the lifetime of the value.
pub struct TerminalSession {
    _private: (),
}

impl TerminalSession {
    pub fn start() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(stdout(), EnableMouseCapture) {
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
        Ok(Self { _private: () })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Err(e) = execute!(stdout(), DisableMouseCapture, Print("\r\n")) {
            debug!("Failed to release mouse capture: {}", e);
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Map a key press to the character the loop understands.
///
/// Ctrl+C quits, since raw mode swallows the interrupt signal.
fn key_char(key: &KeyEvent) -> Option<char> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some('q'),
        KeyCode::Char(c) => Some(c),
        _ => None,
    }
}

/// Whether a key press ends the modal viewer session.
fn closes_session(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
        && (matches!(key.code, KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q'))
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)))
}

/// Status line on the terminal, with optional PNG dumps of each image.
pub struct TerminalDisplay {
    dump_dir: Option<PathBuf>,
    presented: u64,
}

impl TerminalDisplay {
    pub fn new(dump_dir: Option<PathBuf>) -> io::Result<Self> {
        if let Some(dir) = &dump_dir {
            std::fs::create_dir_all(dir)?;
            info!("Writing presented frames to {}", dir.display());
        }
        Ok(Self {
            dump_dir,
            presented: 0,
        })
    }

    /// Images presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Display for TerminalDisplay {
    fn show(&mut self, image: &RgbImage, status: &str) {
        self.presented += 1;

        if let Some(dir) = &self.dump_dir {
            let path = dir.join(format!("frame_{:06}.png", self.presented));
            if let Err(e) = image.save(&path) {
                warn!("Failed to write {}: {}", path.display(), e);
            }
        }

        print_status(&format!("[{}x{}] {}", image.width(), image.height(), status));
    }

    fn poll_key(&mut self, timeout: Duration) -> Option<char> {
        match event::poll(timeout) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) => key_char(&key),
                Ok(_) => None,
                Err(e) => {
                    debug!("Failed to read terminal event: {}", e);
                    None
                }
            },
            Ok(false) => None,
            Err(e) => {
                debug!("Failed to poll terminal events: {}", e);
                None
            }
        }
    }
}

/// Orbit parameters driven by the mouse.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Orbit {
    yaw: f32,
    pitch: f32,
    distance: f32,
}

impl Orbit {
    /// Camera-to-world pose looking at `target` along the camera's +z.
    fn pose(&self, target: Vec3) -> Affine3A {
        let rotation = Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0);
        let eye = target - rotation * (Vec3::Z * self.distance);
        Affine3A::from_rotation_translation(rotation, eye)
    }

    /// Absolute pointer position over a `columns` x `rows` terminal.
    fn aim(&mut self, x: f32, y: f32, columns: f32, rows: f32) {
        self.yaw = (x / columns.max(1.0) - 0.5) * std::f32::consts::PI;
        self.pitch = (y / rows.max(1.0) - 0.5) * std::f32::consts::FRAC_PI_2;
    }

    fn zoom(&mut self, steps: f32) {
        self.distance = (self.distance + steps * ORBIT_STEP).max(ORBIT_MIN_DISTANCE);
    }
}

impl Default for Orbit {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            distance: 1.5,
        }
    }
}

struct PlacedWidget {
    widget: Widget,
    pose: Option<Affine3A>,
}

/// Widget scene reported on the terminal.
pub struct TerminalViewer {
    widgets: BTreeMap<String, PlacedWidget>,
    pose: Affine3A,
    orbit: Orbit,
    ticks: u64,
}

impl TerminalViewer {
    pub fn new() -> Self {
        Self {
            widgets: BTreeMap::new(),
            pose: Affine3A::IDENTITY,
            orbit: Orbit::default(),
            ticks: 0,
        }
    }

    /// Centre of the volume wireframe, or one metre ahead of the origin.
    fn orbit_target(&self) -> Vec3 {
        self.widgets
            .values()
            .find_map(|placed| match placed.widget {
                Widget::Cube { min, max } => {
                    let centre = (min + max) * 0.5;
                    Some(placed.pose.unwrap_or(Affine3A::IDENTITY).transform_point3(centre))
                }
                _ => None,
            })
            .unwrap_or(Vec3::Z)
    }

    fn summary(&self) -> String {
        self.widgets
            .iter()
            .map(|(name, placed)| match &placed.widget {
                Widget::Cloud { points, .. } => format!("{name}: {} points", points.len()),
                Widget::PolyLine { points, .. } => format!("{name}: {} vertices", points.len()),
                other => format!("{name}: {}", other.kind()),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn mouse_event(&mut self, kind: MouseEventKind, column: u16, row: u16) -> Option<MouseEvent> {
        let event = match kind {
            MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                let (columns, rows) = terminal::size().unwrap_or((80, 24));
                self.orbit
                    .aim(column as f32, row as f32, columns as f32, rows as f32);
                MouseEvent::Moved {
                    x: column as f32,
                    y: row as f32,
                }
            }
            MouseEventKind::ScrollUp => {
                self.orbit.zoom(-1.0);
                MouseEvent::ScrollUp
            }
            MouseEventKind::ScrollDown => {
                self.orbit.zoom(1.0);
                MouseEvent::ScrollDown
            }
            MouseEventKind::Down(_) => MouseEvent::ButtonDown,
            MouseEventKind::Up(_) => MouseEvent::ButtonUp,
            _ => return None,
        };

        if event.moves_view() {
            self.pose = self.orbit.pose(self.orbit_target());
        }
        Some(event)
    }
}

impl Default for TerminalViewer {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewer for TerminalViewer {
    fn show_widget(&mut self, name: &str, widget: Widget, pose: Option<Affine3A>) {
        self.widgets
            .insert(name.to_string(), PlacedWidget { widget, pose });
    }

    fn remove_widget(&mut self, name: &str) {
        self.widgets.remove(name);
    }

    fn spin_once(&mut self, _duration: Duration, force_redraw: bool) {
        self.ticks += 1;
        if force_redraw {
            debug!("Scene tick {}: {}", self.ticks, self.summary());
        }
    }

    fn spin(&mut self, on_mouse: &mut dyn FnMut(&MouseEvent, &Affine3A)) {
        let hint = self.widgets.values().find_map(|placed| match &placed.widget {
            Widget::Text { text } => Some(text.clone()),
            _ => None,
        });
        print_status(&format!("{} [{}]", hint.unwrap_or_default(), self.summary()));

        loop {
            match event::read() {
                Ok(Event::Key(key)) if closes_session(&key) => break,
                Ok(Event::Mouse(mouse)) => {
                    if let Some(event) = self.mouse_event(mouse.kind, mouse.column, mouse.row) {
                        on_mouse(&event, &self.pose);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Viewer session ended: {}", e);
                    break;
                }
            }
        }
    }

    fn viewer_pose(&self) -> Affine3A {
        self.pose
    }

    fn set_viewer_pose(&mut self, pose: Affine3A) {
        self.pose = pose;
    }
}
