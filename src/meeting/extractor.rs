use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{imageops, GrayImage, RgbaImage};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::geometry::{Anchor, MatchedRegion, Region};
use crate::vision::color::contains_reddish;
use crate::vision::locator::{locate, topmost, LocateParams};
use crate::vision::ocr::{TextRecognizer, DEFAULT_ENGINE_CONFIG, DIGITS_ENGINE_CONFIG};

use super::{CycleOutcome, MeetingReading};

/// How far a cached search offset extends past the matched landmark
/// (area growth, center-anchored).
const OFFSET_GROWTH: f64 = 1.5;

/// The participant icon tolerates more visual variation than the other
/// landmarks, so it matches at a lower score.
const PARTICIPANT_ICON_THRESHOLD: f32 = 0.7;

// Text-field geometry, in template pixels at scale 1.0. Scaled by the
// matched landmark's scale factor before use.
const DURATION_GAP: f64 = 20.0;
const DURATION_WIDTH: f64 = 150.0;
const PARTICIPANT_GAP: f64 = 3.0;
const PARTICIPANT_WIDTH: f64 = 50.0;

// Two or three colon-delimited two-digit groups, anchored at the start of
// the token. Deliberately lenient: group values are not range-checked.
static DURATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d{2}):)?(\d{2}):(\d{2})").unwrap());

/// The three fixed, pre-captured landmark images.
pub struct LandmarkTemplates {
    pub leave_control: GrayImage,
    pub status_shield: GrayImage,
    pub participant_icon: GrayImage,
}

impl LandmarkTemplates {
    pub fn load(leave: &Path, shield: &Path, participants: &Path) -> Result<Self> {
        Ok(Self {
            leave_control: load_template(leave)?,
            status_shield: load_template(shield)?,
            participant_icon: load_template(participants)?,
        })
    }
}

fn load_template(path: &Path) -> Result<GrayImage> {
    Ok(image::open(path)
        .with_context(|| format!("load landmark template {}", path.display()))?
        .to_luma8())
}

/// Previously-discovered search neighborhoods, one per landmark or text
/// field. Unset at session start, set after the first successful match,
/// reused verbatim every cycle after that. Cleared only explicitly (window
/// moved or resized, controller re-initialization), never on a failed cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OffsetCache {
    pub leave_control: Option<Region>,
    pub status_shield: Option<Region>,
    pub participant_icon: Option<Region>,
    pub duration_text: Option<Region>,
    pub participant_text: Option<Region>,
}

impl OffsetCache {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True before the first successful localization of the session.
    pub fn is_empty(&self) -> bool {
        self.leave_control.is_none()
            && self.status_shield.is_none()
            && self.participant_icon.is_none()
            && self.duration_text.is_none()
            && self.participant_text.is_none()
    }

    /// Every cached region, for debug annotation.
    pub fn regions(&self) -> Vec<Region> {
        [
            self.leave_control,
            self.status_shield,
            self.participant_icon,
            self.duration_text,
            self.participant_text,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Turns one screen capture into a validated meeting reading.
pub struct StateExtractor {
    templates: LandmarkTemplates,
    recognizer: Box<dyn TextRecognizer>,
    offsets: OffsetCache,
}

impl StateExtractor {
    pub fn new(templates: LandmarkTemplates, recognizer: Box<dyn TextRecognizer>) -> Self {
        Self {
            templates,
            recognizer,
            offsets: OffsetCache::default(),
        }
    }

    pub fn offsets(&self) -> &OffsetCache {
        &self.offsets
    }

    pub fn clear_offsets(&mut self) {
        self.offsets.clear();
    }

    /// One extraction cycle, in strict order: leave control, status shield,
    /// participant icon, duration text, raised-hand check, participant count.
    /// Duration must resolve before any participant work; a duration failure
    /// short-circuits the rest of the cycle.
    pub fn extract(&mut self, frame: &RgbaImage) -> CycleOutcome {
        let gray = imageops::grayscale(frame);
        let defaults = LocateParams::default();

        // The leave control anchors the whole extraction: zero matches
        // means the call chrome is not visible at all.
        if Self::locate_cached(
            &gray,
            &self.templates.leave_control,
            &mut self.offsets.leave_control,
            &defaults,
        )
        .is_none()
        {
            return CycleOutcome::NotFound("leave control");
        }

        // The shield and icon only need re-locating until their dependent
        // text-field offsets are cached.
        let mut shield = None;
        if self.offsets.duration_text.is_none() {
            match Self::locate_cached(
                &gray,
                &self.templates.status_shield,
                &mut self.offsets.status_shield,
                &defaults,
            ) {
                Some(m) => shield = Some(m),
                None => return CycleOutcome::NotFound("status shield"),
            }
        }

        let mut icon = None;
        if self.offsets.participant_text.is_none() {
            let params = LocateParams::with_threshold(PARTICIPANT_ICON_THRESHOLD);
            match Self::locate_cached(
                &gray,
                &self.templates.participant_icon,
                &mut self.offsets.participant_icon,
                &params,
            ) {
                Some(m) => icon = Some(m),
                None => return CycleOutcome::NotFound("participant icon"),
            }
        }

        if self.offsets.duration_text.is_none() {
            let Some(shield) = shield.as_ref() else {
                return CycleOutcome::NotFound("status shield");
            };
            self.offsets.duration_text =
                Some(text_field_right_of(shield, DURATION_GAP, DURATION_WIDTH));
        }
        let duration = match self.read_duration(frame) {
            Ok(d) => d,
            Err(outcome) => return outcome,
        };

        // A raised hand overlays the participant icon in red and pushes the
        // count out of view. The duration above is still good.
        let Some(icon_zone) = self.offsets.participant_icon else {
            return CycleOutcome::NotFound("participant icon");
        };
        if contains_reddish(frame, icon_zone) {
            return CycleOutcome::ParticipantsWithheld { duration };
        }

        if self.offsets.participant_text.is_none() {
            let Some(icon) = icon.as_ref() else {
                return CycleOutcome::NotFound("participant icon");
            };
            self.offsets.participant_text =
                Some(text_field_right_of(icon, PARTICIPANT_GAP, PARTICIPANT_WIDTH));
        }
        match self.read_participants(frame) {
            Ok(participants) => CycleOutcome::Reading(MeetingReading {
                duration,
                participants,
            }),
            Err(outcome) => outcome,
        }
    }

    /// The same single-landmark localization as the first extraction step,
    /// shared with the leave-click path. Caches the offset on first success.
    pub fn locate_leave_control(&mut self, frame: &RgbaImage) -> Option<MatchedRegion> {
        let gray = imageops::grayscale(frame);
        Self::locate_cached(
            &gray,
            &self.templates.leave_control,
            &mut self.offsets.leave_control,
            &LocateParams::default(),
        )
    }

    fn locate_cached(
        gray: &GrayImage,
        template: &GrayImage,
        slot: &mut Option<Region>,
        params: &LocateParams,
    ) -> Option<MatchedRegion> {
        let found = topmost(locate(gray, template, *slot, params))?;
        if slot.is_none() {
            *slot = Some(
                found
                    .region
                    .scaled_by(OFFSET_GROWTH, OFFSET_GROWTH, Anchor::Center),
            );
        }
        Some(found)
    }

    fn read_duration(&self, frame: &RgbaImage) -> Result<Duration, CycleOutcome> {
        let Some(region) = self.offsets.duration_text else {
            return Err(CycleOutcome::NotFound("duration text"));
        };
        let tokens = match self
            .recognizer
            .recognize(frame, Some(region), DEFAULT_ENGINE_CONFIG)
        {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!("duration recognition failed: {err:#}");
                return Err(CycleOutcome::NotFound("duration text"));
            }
        };
        if tokens.is_empty() {
            return Err(CycleOutcome::NotFound("duration text"));
        }
        tokens
            .iter()
            .find_map(|t| parse_duration_text(&t.text))
            .ok_or(CycleOutcome::InvalidFormat("duration"))
    }

    fn read_participants(&self, frame: &RgbaImage) -> Result<u32, CycleOutcome> {
        let Some(region) = self.offsets.participant_text else {
            return Err(CycleOutcome::NotFound("participant count"));
        };
        let tokens = match self
            .recognizer
            .recognize(frame, Some(region), DIGITS_ENGINE_CONFIG)
        {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!("participant recognition failed: {err:#}");
                return Err(CycleOutcome::NotFound("participant count"));
            }
        };
        if tokens.is_empty() {
            return Err(CycleOutcome::NotFound("participant count"));
        }
        for token in &tokens {
            if token.text.chars().any(|c| c.is_ascii_digit()) {
                let digits: String = token
                    .text
                    .chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect();
                return digits
                    .parse()
                    .map_err(|_| CycleOutcome::InvalidFormat("participant count"));
            }
        }
        // An icon with no visible number next to it means exactly one
        // participant, but only when the leading token is blank; anything
        // else next to the icon is a recognition problem.
        if tokens[0].text.trim().is_empty() {
            Ok(1)
        } else {
            Err(CycleOutcome::InvalidFormat("participant count"))
        }
    }
}

/// Search rectangle for a text field immediately to the right of a matched
/// landmark, gap and width proportional to the matched scale.
fn text_field_right_of(landmark: &MatchedRegion, gap: f64, width: f64) -> Region {
    let r = landmark.region;
    let s = landmark.scale;
    Region::from_f64(
        r.x as f64 + r.w as f64 + gap * s,
        r.y as f64,
        width * s,
        r.h as f64 * s,
    )
}

/// Lenient duration parse: two groups are minutes:seconds, three are
/// hours:minutes:seconds. Group values are not range-checked, so "99:99"
/// parses to 99 minutes 99 seconds.
pub(crate) fn parse_duration_text(text: &str) -> Option<Duration> {
    let caps = DURATION_PATTERN.captures(text.trim())?;
    let hours: u64 = caps
        .get(1)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}
