//! The watch loop: capture, extract, decide, and eventually disconnect.
//!
//! Cycle work is synchronous and runs on the blocking pool; the async shell
//! only owns the ticker and the cancellation token.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbaImage;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::actions::{PointerSink, PowerControl, RecordingControl};
use crate::capture::{FrameSource, WindowOracle};
use crate::cues::CueEngine;
use crate::decision::DecisionEngine;
use crate::meeting::{CycleOutcome, StateExtractor};
use crate::vision::annotate;

/// Whether the loop keeps ticking after this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

pub struct WatcherParts {
    pub frames: Box<dyn FrameSource>,
    pub oracle: Box<dyn WindowOracle>,
    pub pointer: Box<dyn PointerSink>,
    pub recorder: Box<dyn RecordingControl>,
    pub power: Box<dyn PowerControl>,
    pub cues: CueEngine,
    pub extractor: StateExtractor,
    pub engine: DecisionEngine,
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Physical width of the display the pointer moves on, when it differs
    /// from the captured frame width (HiDPI). `None` means click in frame
    /// coordinates.
    pub screen_width: Option<u32>,
    pub click_press: Duration,
    /// Where to write annotated snapshots of failed cycles, if anywhere.
    pub debug_dir: Option<PathBuf>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            screen_width: None,
            click_press: Duration::from_millis(100),
            debug_dir: None,
        }
    }
}

pub struct Watcher {
    parts: WatcherParts,
    options: WatcherOptions,
    session_started: bool,
}

impl Watcher {
    pub fn new(parts: WatcherParts, options: WatcherOptions) -> Self {
        Self {
            parts,
            options,
            session_started: false,
        }
    }

    /// One watch cycle. Failed cycles log, cue, snapshot, and continue; the
    /// cached offsets survive so the next cycle retries from the same
    /// neighborhoods.
    pub fn run_cycle(&mut self) -> Flow {
        // The window gate runs every cycle: a meeting window that gets
        // backgrounded or restored down mid-session must surface as
        // not-ready, not as a failed landmark match.
        match self.parts.oracle.is_ready() {
            Ok(true) => {}
            Ok(false) => {
                self.handle_miss(CycleOutcome::NotReady, None);
                return Flow::Continue;
            }
            Err(err) => {
                log::warn!("window check failed: {err:#}");
                return Flow::Continue;
            }
        }

        // Session start fires once, on the first ready cycle of a fresh
        // session.
        if self.parts.extractor.offsets().is_empty() && !self.session_started {
            self.session_started = true;
            self.parts.cues.play_loading();
            if let Err(err) = self.parts.recorder.start() {
                log::warn!("recording start failed: {err:#}");
            }
        }

        let frame = match self.parts.frames.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("frame capture failed: {err:#}");
                return Flow::Continue;
            }
        };

        match self.parts.extractor.extract(&frame) {
            CycleOutcome::Reading(reading) => {
                self.parts.engine.observe(reading.participants);
                log::info!(
                    "meeting at {}s with {} participants (avg {:.2})",
                    reading.duration.as_secs(),
                    reading.participants,
                    self.parts.engine.average()
                );
                if self
                    .parts
                    .engine
                    .should_disconnect(reading.duration, reading.participants)
                {
                    self.disconnect(&frame);
                    return Flow::Shutdown;
                }
            }
            CycleOutcome::ParticipantsWithheld { duration } => {
                log::info!(
                    "participant count withheld this cycle (duration {}s)",
                    duration.as_secs()
                );
            }
            miss => self.handle_miss(miss, Some(&frame)),
        }
        Flow::Continue
    }

    fn handle_miss(&self, outcome: CycleOutcome, frame: Option<&RgbaImage>) {
        match &outcome {
            CycleOutcome::NotFound(what) => log::warn!("could not locate {what}"),
            CycleOutcome::InvalidFormat(what) => log::warn!("unreadable {what}"),
            CycleOutcome::NotReady => log::warn!("meeting window not ready"),
            _ => {}
        }
        self.parts.cues.play_warning();
        if let (Some(dir), Some(frame)) = (&self.options.debug_dir, frame) {
            let offsets = self.parts.extractor.offsets().regions();
            match annotate::save_snapshot(dir, frame, &[], &offsets) {
                Ok(path) => log::info!("failed cycle snapshot at {}", path.display()),
                Err(err) => log::warn!("snapshot failed: {err:#}"),
            }
        }
    }

    /// Leave the call and put the machine to sleep. The click is best
    /// effort; the meeting client drops us on suspend regardless.
    fn disconnect(&mut self, frame: &RgbaImage) {
        log::info!("disconnect conditions met, leaving the meeting");
        self.parts.cues.stop_all();
        if let Err(err) = self.parts.recorder.stop() {
            log::warn!("recording stop failed: {err:#}");
        }

        if let Some(found) = self.parts.extractor.locate_leave_control(frame) {
            let (cx, cy) = found.region.center();
            let (px, py) = scale_point(cx, cy, frame.width(), self.options.screen_width);
            if let Err(err) = self.parts.pointer.click(px, py, self.options.click_press) {
                log::warn!("leave click failed, relying on suspend: {err:#}");
            }
        } else {
            log::warn!("leave control not found for the final click");
        }

        if let Err(err) = self.parts.power.suspend() {
            log::warn!("suspend failed: {err:#}");
        }
    }
}

/// Map a frame coordinate onto the pointer's coordinate space when the
/// display is scaled.
fn scale_point(x: u32, y: u32, frame_width: u32, screen_width: Option<u32>) -> (u32, u32) {
    match screen_width {
        Some(sw) if frame_width > 0 && sw != frame_width => {
            let ratio = sw as f64 / frame_width as f64;
            (
                (x as f64 * ratio).round() as u32,
                (y as f64 * ratio).round() as u32,
            )
        }
        _ => (x, y),
    }
}

/// Tick until cancelled or the watcher decides to shut down. Each cycle runs
/// on the blocking pool so template matching and OCR never stall the
/// runtime.
pub async fn run(mut watcher: Watcher, interval: Duration, cancel: CancellationToken) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (returned, flow) = tokio::task::spawn_blocking(move || {
                    let flow = watcher.run_cycle();
                    (watcher, flow)
                })
                .await
                .context("watch cycle worker join failed")?;
                watcher = returned;
                if flow == Flow::Shutdown {
                    log::info!("watch loop finished");
                    break;
                }
            }
            _ = cancel.cancelled() => {
                log::info!("watch loop shutting down");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cues::CuePaths;
    use crate::decision::DisconnectPolicy;
    use crate::geometry::{MatchedText, Region};
    use crate::meeting::LandmarkTemplates;
    use crate::vision::ocr::{ScriptedRecognizer, TextRecognizer};
    use image::{GrayImage, Rgba};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    const T: u32 = 12;

    // Sparse (quarter-on) patterns: any blurred template correlates at most
    // around 0.5 against the wrong pattern, so only true stamp locations
    // clear the matching thresholds.
    fn stripe_v(x: u32, _y: u32) -> u8 {
        if x % 8 < 2 {
            255
        } else {
            0
        }
    }

    fn stripe_h(_x: u32, y: u32) -> u8 {
        if y % 8 < 2 {
            255
        } else {
            0
        }
    }

    fn checker(x: u32, y: u32) -> u8 {
        if (x / 2 + y / 2) % 4 == 0 {
            255
        } else {
            0
        }
    }

    fn template(pattern: fn(u32, u32) -> u8) -> GrayImage {
        GrayImage::from_fn(T, T, |x, y| image::Luma([pattern(x, y)]))
    }

    fn meeting_frame() -> RgbaImage {
        let stamps: [((u32, u32), fn(u32, u32) -> u8); 3] = [
            ((120, 8), stripe_v),
            ((8, 40), stripe_h),
            ((64, 40), checker),
        ];
        RgbaImage::from_fn(160, 100, |x, y| {
            let v = stamps
                .iter()
                .find_map(|&(at, pattern)| {
                    (x >= at.0 && x < at.0 + T && y >= at.1 && y < at.1 + T)
                        .then(|| pattern(x - at.0, y - at.1))
                })
                .unwrap_or(if (x + y) % 4 == 0 { 255 } else { 0 });
            Rgba([v, v, v, 255])
        })
    }

    struct StaticFrames {
        frame: RgbaImage,
        served: Arc<AtomicUsize>,
    }

    impl FrameSource for StaticFrames {
        fn next_frame(&mut self) -> Result<RgbaImage> {
            self.served.fetch_add(1, Ordering::SeqCst);
            Ok(self.frame.clone())
        }
    }

    struct FixedOracle(bool);

    impl WindowOracle for FixedOracle {
        fn is_ready(&self) -> Result<bool> {
            Ok(self.0)
        }
    }

    /// Replays scripted readiness answers (defaulting to ready once
    /// exhausted) and counts how often it is consulted.
    struct ScriptedOracle {
        responses: std::sync::Mutex<std::collections::VecDeque<bool>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedOracle {
        fn new(responses: &[bool], calls: Arc<AtomicUsize>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.iter().copied().collect()),
                calls,
            }
        }
    }

    impl WindowOracle for ScriptedOracle {
        fn is_ready(&self) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or(true))
        }
    }

    struct FlagPointer(Arc<AtomicUsize>);

    impl PointerSink for FlagPointer {
        fn click(&self, _x: u32, _y: u32, _press: Duration) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlagRecorder {
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
    }

    impl RecordingControl for FlagRecorder {
        fn start(&self) -> Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlagPower(Arc<AtomicBool>);

    impl PowerControl for FlagPower {
        fn suspend(&self) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Shared(Arc<ScriptedRecognizer>);

    impl TextRecognizer for Shared {
        fn recognize(
            &self,
            frame: &RgbaImage,
            search: Option<Region>,
            engine_config: &str,
        ) -> Result<Vec<MatchedText>> {
            self.0.recognize(frame, search, engine_config)
        }
    }

    struct Probes {
        served: Arc<AtomicUsize>,
        clicks: Arc<AtomicUsize>,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        suspended: Arc<AtomicBool>,
    }

    fn watcher_with(
        script: Arc<ScriptedRecognizer>,
        oracle: Box<dyn WindowOracle>,
        policy: DisconnectPolicy,
    ) -> (Watcher, Probes) {
        let probes = Probes {
            served: Arc::new(AtomicUsize::new(0)),
            clicks: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            suspended: Arc::new(AtomicBool::new(false)),
        };
        let extractor = StateExtractor::new(
            LandmarkTemplates {
                leave_control: template(stripe_v),
                status_shield: template(stripe_h),
                participant_icon: template(checker),
            },
            Box::new(Shared(script)),
        );
        let watcher = Watcher::new(
            WatcherParts {
                frames: Box::new(StaticFrames {
                    frame: meeting_frame(),
                    served: Arc::clone(&probes.served),
                }),
                oracle,
                pointer: Box::new(FlagPointer(Arc::clone(&probes.clicks))),
                recorder: Box::new(FlagRecorder {
                    started: Arc::clone(&probes.started),
                    stopped: Arc::clone(&probes.stopped),
                }),
                power: Box::new(FlagPower(Arc::clone(&probes.suspended))),
                cues: CueEngine::new(CuePaths::default()),
                extractor,
                engine: DecisionEngine::new(policy),
            },
            WatcherOptions::default(),
        );
        (watcher, probes)
    }

    #[test]
    fn not_ready_skips_capture_entirely() {
        let script = Arc::new(ScriptedRecognizer::new());
        let (mut watcher, probes) = watcher_with(
            script,
            Box::new(FixedOracle(false)),
            DisconnectPolicy::default(),
        );
        assert_eq!(watcher.run_cycle(), Flow::Continue);
        assert_eq!(probes.served.load(Ordering::SeqCst), 0);
        assert!(!probes.started.load(Ordering::SeqCst));
    }

    #[test]
    fn readiness_is_rechecked_even_after_offsets_are_cached() {
        let script = Arc::new(ScriptedRecognizer::new());
        script.enqueue_texts(&["12:07"]);
        script.enqueue_texts(&["4"]);
        let oracle_calls = Arc::new(AtomicUsize::new(0));
        let (mut watcher, probes) = watcher_with(
            script,
            Box::new(ScriptedOracle::new(
                &[true, false],
                Arc::clone(&oracle_calls),
            )),
            DisconnectPolicy::default(),
        );

        assert_eq!(watcher.run_cycle(), Flow::Continue);
        assert!(!watcher.parts.extractor.offsets().is_empty());
        let avg = watcher.parts.engine.average();
        assert!(avg > 0.0);

        // Window goes away mid-session: the cycle stops at the gate, with
        // no capture, no extraction, and no average update.
        assert_eq!(watcher.run_cycle(), Flow::Continue);
        assert_eq!(oracle_calls.load(Ordering::SeqCst), 2);
        assert_eq!(probes.served.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.parts.engine.average(), avg);
    }

    #[test]
    fn healthy_reading_continues_and_starts_the_session_once() {
        let script = Arc::new(ScriptedRecognizer::new());
        script.enqueue_texts(&["12:07"]);
        script.enqueue_texts(&["4"]);
        script.enqueue_texts(&["12:12"]);
        script.enqueue_texts(&["4"]);
        let (mut watcher, probes) = watcher_with(
            script,
            Box::new(FixedOracle(true)),
            DisconnectPolicy::default(),
        );

        assert_eq!(watcher.run_cycle(), Flow::Continue);
        assert!(probes.started.load(Ordering::SeqCst));
        assert_eq!(watcher.run_cycle(), Flow::Continue);
        assert_eq!(probes.served.load(Ordering::SeqCst), 2);
        assert!(!probes.suspended.load(Ordering::SeqCst));
    }

    #[test]
    fn overlong_meeting_triggers_the_full_disconnect_sequence() {
        let script = Arc::new(ScriptedRecognizer::new());
        script.enqueue_texts(&["01:30:00"]);
        script.enqueue_texts(&["4"]);
        let (mut watcher, probes) = watcher_with(
            script,
            Box::new(FixedOracle(true)),
            DisconnectPolicy::default(),
        );

        assert_eq!(watcher.run_cycle(), Flow::Shutdown);
        assert!(probes.stopped.load(Ordering::SeqCst));
        assert_eq!(probes.clicks.load(Ordering::SeqCst), 1);
        assert!(probes.suspended.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_cycle_keeps_cached_offsets() {
        let script = Arc::new(ScriptedRecognizer::new());
        script.enqueue_texts(&["12:07"]);
        script.enqueue_texts(&["4"]);
        // Second cycle: duration field reads empty.
        script.enqueue(Vec::new());
        let (mut watcher, _probes) = watcher_with(
            script,
            Box::new(FixedOracle(true)),
            DisconnectPolicy::default(),
        );

        assert_eq!(watcher.run_cycle(), Flow::Continue);
        let cached = watcher.parts.extractor.offsets().clone();
        assert!(!cached.is_empty());

        assert_eq!(watcher.run_cycle(), Flow::Continue);
        assert_eq!(watcher.parts.extractor.offsets(), &cached);
    }

    #[test]
    fn point_scaling() {
        assert_eq!(scale_point(100, 50, 1600, None), (100, 50));
        assert_eq!(scale_point(100, 50, 1600, Some(1600)), (100, 50));
        // Retina capture at 2x: frame 3200 wide, screen 1600.
        assert_eq!(scale_point(100, 50, 3200, Some(1600)), (50, 25));
    }
}
