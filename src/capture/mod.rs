//! Frame acquisition and the meeting-window precondition.
//!
//! The watcher core only ever sees an `RgbaImage`; whether it came from the
//! primary display or from a directory of saved frames is this module's
//! business.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use xcap::{Monitor, Window};

/// Produces one frame per watch cycle.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<RgbaImage>;
}

/// Captures the primary display through the OS screen-capture API.
pub struct ScreenSource {
    monitor: Monitor,
}

impl ScreenSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            monitor: primary_monitor()?,
        })
    }

    /// Physical width of the captured display, for mapping frame coordinates
    /// back to pointer coordinates.
    pub fn width(&self) -> u32 {
        self.monitor.width()
    }
}

impl FrameSource for ScreenSource {
    fn next_frame(&mut self) -> Result<RgbaImage> {
        self.monitor
            .capture_image()
            .context("capture primary monitor")
    }
}

/// Width of the primary display without holding a capture source open.
pub fn primary_screen_width() -> Result<u32> {
    Ok(primary_monitor()?.width())
}

fn primary_monitor() -> Result<Monitor> {
    let monitors = Monitor::all().context("enumerate monitors")?;
    monitors
        .into_iter()
        .find(|m| m.is_primary())
        .ok_or_else(|| anyhow!("no primary monitor found"))
}

/// Replays PNG frames from a directory in filename order, wrapping around
/// when the end is reached. For running the watcher against recorded
/// sessions.
pub struct ReplaySource {
    frames: Vec<PathBuf>,
    next: usize,
}

impl ReplaySource {
    pub fn new(dir: &std::path::Path) -> Result<Self> {
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("read replay dir {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(anyhow!("no .png frames in {}", dir.display()));
        }
        Ok(Self { frames, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<RgbaImage> {
        if self.next == self.frames.len() {
            log::info!("replay wrapped after {} frames", self.frames.len());
            self.next = 0;
        }
        let path = &self.frames[self.next];
        self.next += 1;
        let img = image::open(path)
            .with_context(|| format!("load replay frame {}", path.display()))?;
        Ok(img.to_rgba8())
    }
}

/// Answers whether the meeting window is in a state worth analyzing.
pub trait WindowOracle: Send {
    fn is_ready(&self) -> Result<bool>;
}

/// Ready when some maximized window's title ends with the configured suffix,
/// excluding auxiliary windows whose titles start with a known prefix.
pub struct MeetingWindowOracle {
    title_suffix: String,
    excluded_prefix: Option<String>,
}

impl MeetingWindowOracle {
    pub fn new(title_suffix: String, excluded_prefix: Option<String>) -> Self {
        Self {
            title_suffix,
            excluded_prefix,
        }
    }

    fn matches(&self, title: &str) -> bool {
        if !title.ends_with(&self.title_suffix) {
            return false;
        }
        if let Some(prefix) = &self.excluded_prefix {
            if title.starts_with(&format!("{} | ", prefix)) {
                return false;
            }
        }
        true
    }
}

impl WindowOracle for MeetingWindowOracle {
    fn is_ready(&self) -> Result<bool> {
        let windows = Window::all().context("enumerate windows")?;
        Ok(windows
            .iter()
            .any(|w| w.is_maximized() && self.matches(&w.title())))
    }
}

/// Unconditionally ready. Used for replay runs where no live window exists.
pub struct AlwaysReady;

impl WindowOracle for AlwaysReady {
    fn is_ready(&self) -> Result<bool> {
        Ok(true)
    }
}
