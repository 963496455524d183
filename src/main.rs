use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use autoleave::actions::{CommandRecorder, DesktopPointer, NullRecorder, RecordingControl, SystemSuspend};
use autoleave::app::{self, Watcher, WatcherOptions, WatcherParts};
use autoleave::capture::{AlwaysReady, FrameSource, MeetingWindowOracle, ReplaySource, ScreenSource, WindowOracle};
use autoleave::config::Config;
use autoleave::cues::CueEngine;
use autoleave::decision::DecisionEngine;
use autoleave::meeting::{LandmarkTemplates, StateExtractor};
use autoleave::vision::annotate;
use autoleave::vision::ocr::TesseractRecognizer;

/// Watches a conference call on screen and leaves it, then sleeps the
/// machine, once everyone else has gone.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the JSON config file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Replay PNG frames from this directory instead of capturing the
    /// screen.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Write annotated snapshots of failed cycles, overriding the config.
    #[arg(long)]
    debug_images: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let templates = LandmarkTemplates::load(
        &config.templates.leave_control,
        &config.templates.status_shield,
        &config.templates.participant_icon,
    )?;
    let recognizer = TesseractRecognizer::new(config.ocr.lang.clone());
    let extractor = StateExtractor::new(templates, Box::new(recognizer));
    let engine = DecisionEngine::new(config.policy.to_policy()?);

    let (frames, oracle, screen_width): (Box<dyn FrameSource>, Box<dyn WindowOracle>, Option<u32>) =
        match &args.replay {
            Some(dir) => {
                let source = ReplaySource::new(dir)?;
                log::info!("replaying {} frames from {}", source.len(), dir.display());
                (Box::new(source), Box::new(AlwaysReady), None)
            }
            None => {
                let source = ScreenSource::new()?;
                let width = source.width();
                let oracle = MeetingWindowOracle::new(
                    config.watch.window_title_suffix.clone(),
                    config.watch.excluded_window_prefix.clone(),
                );
                (Box::new(source), Box::new(oracle), Some(width))
            }
        };

    let recorder: Box<dyn RecordingControl> = match (
        config.recording.enabled,
        &config.recording.start_cmd,
        &config.recording.stop_cmd,
    ) {
        (true, Some(start), Some(stop)) => {
            Box::new(CommandRecorder::new(start.clone(), stop.clone()))
        }
        (true, _, _) => {
            log::warn!("recording enabled but start/stop commands missing, disabling");
            Box::new(NullRecorder)
        }
        _ => Box::new(NullRecorder),
    };

    let debug_dir = (args.debug_images || config.debug_images.enabled)
        .then(|| config.debug_images.dir.clone());
    if let Some(dir) = &debug_dir {
        if config.debug_images.clear_on_start {
            annotate::clear_snapshots(dir);
        }
    }

    let watcher = Watcher::new(
        WatcherParts {
            frames,
            oracle,
            pointer: Box::new(DesktopPointer),
            recorder,
            power: Box::new(SystemSuspend),
            cues: CueEngine::new(config.sounds.to_cue_paths()),
            extractor,
            engine,
        },
        WatcherOptions {
            screen_width,
            click_press: Duration::from_millis(config.watch.click_press_millis),
            debug_dir,
        },
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received");
            signal_token.cancel();
        }
    });

    app::run(
        watcher,
        Duration::from_secs(config.watch.interval_secs),
        cancel,
    )
    .await
    .context("watch loop failed")
}
