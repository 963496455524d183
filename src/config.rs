//! JSON configuration, loaded once at startup and handed to the
//! constructors that need each section. Missing fields fall back to
//! defaults, so a minimal config only names the template images.

use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cues::CuePaths;
use crate::decision::DisconnectPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Seconds between watch cycles.
    pub interval_secs: u64,
    /// Window title suffix that marks the meeting window.
    pub window_title_suffix: String,
    /// Title prefix of auxiliary windows to ignore.
    pub excluded_window_prefix: Option<String>,
    /// How long the leave-control click holds the button, in milliseconds.
    pub click_press_millis: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            window_title_suffix: "| Microsoft Teams".into(),
            excluded_window_prefix: Some("Activity".into()),
            click_press_millis: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// Template image for the leave control.
    pub leave_control: PathBuf,
    /// Template image for the status shield left of the duration text.
    pub status_shield: PathBuf,
    /// Template image for the participant icon.
    pub participant_icon: PathBuf,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            leave_control: "templates/leave_control.png".into(),
            status_shield: "templates/status_shield.png".into(),
            participant_icon: "templates/participant_icon.png".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Tesseract language pack.
    pub lang: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self { lang: "eng".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Grace period before any termination, as `HH:MM:SS`.
    pub min_time: String,
    /// Hard ceiling after which termination is unconditional, as `HH:MM:SS`.
    pub max_time: String,
    pub min_participants: u32,
    pub min_ratio: f64,
    pub moving_avg_len: u32,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            min_time: "00:05:00".into(),
            max_time: "01:00:00".into(),
            min_participants: 2,
            min_ratio: 0.5,
            moving_avg_len: 10,
        }
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> Result<DisconnectPolicy> {
        Ok(DisconnectPolicy {
            min_time: parse_hms(&self.min_time).context("policy.min_time")?,
            max_time: parse_hms(&self.max_time).context("policy.max_time")?,
            min_participants: self.min_participants,
            min_ratio: self.min_ratio,
            moving_avg_len: self.moving_avg_len,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SoundSettings {
    pub loading: Option<PathBuf>,
    pub warning: Option<PathBuf>,
}

impl SoundSettings {
    pub fn to_cue_paths(&self) -> CuePaths {
        CuePaths {
            loading: self.loading.clone(),
            warning: self.warning.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub start_cmd: Option<String>,
    pub stop_cmd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugImageSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Clear leftover snapshots from the previous run at startup.
    pub clear_on_start: bool,
}

impl Default for DebugImageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "debug_frames".into(),
            clear_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub watch: WatchSettings,
    pub templates: TemplateSettings,
    pub ocr: OcrSettings,
    pub policy: PolicySettings,
    pub sounds: SoundSettings,
    pub recording: RecordingSettings,
    pub debug_images: DebugImageSettings,
}

impl Config {
    /// Load from `path`, or fall back to defaults when no file exists. A
    /// present but malformed file is an error, not a silent default.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse config {}", path.display()))
    }
}

/// Parse a strict `HH:MM:SS` string into a `Duration`.
pub fn parse_hms(s: &str) -> Result<Duration> {
    let parts: Vec<&str> = s.split(':').collect();
    let [h, m, sec] = parts.as_slice() else {
        return Err(anyhow!("expected HH:MM:SS, got {s:?}"));
    };
    let h: u64 = h.parse().map_err(|_| anyhow!("bad hours in {s:?}"))?;
    let m: u64 = m.parse().map_err(|_| anyhow!("bad minutes in {s:?}"))?;
    let sec: u64 = sec.parse().map_err(|_| anyhow!("bad seconds in {s:?}"))?;
    if m > 59 || sec > 59 {
        return Err(anyhow!("minutes and seconds must be below 60 in {s:?}"));
    }
    Ok(Duration::from_secs(h * 3600 + m * 60 + sec))
}
