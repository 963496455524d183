//! Audible cues. Playback runs on a dedicated thread holding the non-Send
//! rodio objects; the handle just sends commands. With no sound files
//! configured every call is a no-op.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;

use anyhow::{anyhow, Result};
use rodio::{Decoder, OutputStream, Sink};

enum CueCommand {
    PlayLoading,
    PlayWarning,
    StopAll,
}

/// Which sound plays for which event. `None` silences that event.
#[derive(Debug, Clone, Default)]
pub struct CuePaths {
    /// Played once when a fresh watch session starts.
    pub loading: Option<PathBuf>,
    /// Played when a cycle fails; skipped while a previous cue still plays.
    pub warning: Option<PathBuf>,
}

impl CuePaths {
    fn is_silent(&self) -> bool {
        self.loading.is_none() && self.warning.is_none()
    }
}

pub struct CueEngine {
    tx: Arc<Mutex<Option<Sender<CueCommand>>>>,
    paths: CuePaths,
}

impl CueEngine {
    pub fn new(paths: CuePaths) -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
            paths,
        }
    }

    fn ensure_thread(&self) -> Result<Sender<CueCommand>> {
        if let Some(tx) = self
            .tx
            .lock()
            .map_err(|e| anyhow!("cue engine lock poisoned: {e}"))?
            .as_ref()
        {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<CueCommand>();
        let paths = self.paths.clone();

        // Dedicated thread holding the non-Send output stream and sink.
        thread::Builder::new()
            .name("cue-engine".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;

                fn ensure_sink(
                    stream: &mut Option<OutputStream>,
                    sink: &mut Option<Sink>,
                ) -> Result<()> {
                    if sink.is_none() {
                        let (s, handle) = OutputStream::try_default()
                            .map_err(|e| anyhow!("open audio output: {e}"))?;
                        let new_sink =
                            Sink::try_new(&handle).map_err(|e| anyhow!("create sink: {e}"))?;
                        *stream = Some(s);
                        *sink = Some(new_sink);
                    }
                    Ok(())
                }

                fn append_file(sink: &Sink, path: &PathBuf) -> Result<()> {
                    let file = File::open(path)
                        .map_err(|e| anyhow!("open cue {}: {e}", path.display()))?;
                    let source = Decoder::new(BufReader::new(file))
                        .map_err(|e| anyhow!("decode cue {}: {e}", path.display()))?;
                    sink.append(source);
                    Ok(())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        CueCommand::PlayLoading => {
                            if let Some(path) = &paths.loading {
                                if ensure_sink(&mut _stream, &mut sink).is_ok() {
                                    if let Some(ref s) = sink {
                                        if let Err(e) = append_file(s, path) {
                                            log::warn!("loading cue failed: {e:#}");
                                        }
                                    }
                                }
                            }
                        }
                        CueCommand::PlayWarning => {
                            if let Some(path) = &paths.warning {
                                if ensure_sink(&mut _stream, &mut sink).is_ok() {
                                    if let Some(ref s) = sink {
                                        // Do not stack warnings on top of a
                                        // cue that is still playing.
                                        if s.empty() {
                                            if let Err(e) = append_file(s, path) {
                                                log::warn!("warning cue failed: {e:#}");
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        CueCommand::StopAll => {
                            if let Some(s_old) = sink.take() {
                                s_old.stop();
                            }
                            _stream = None;
                        }
                    }
                }
            })
            .map_err(|e| anyhow!("spawn cue thread: {e}"))?;

        let tx_clone = tx.clone();
        *self
            .tx
            .lock()
            .map_err(|e| anyhow!("cue engine lock poisoned: {e}"))? = Some(tx);
        Ok(tx_clone)
    }

    fn send(&self, cmd: CueCommand) {
        if self.paths.is_silent() {
            return;
        }
        match self.ensure_thread() {
            Ok(tx) => {
                let _ = tx.send(cmd);
            }
            Err(e) => log::warn!("cue engine unavailable: {e:#}"),
        }
    }

    pub fn play_loading(&self) {
        self.send(CueCommand::PlayLoading);
    }

    pub fn play_warning(&self) {
        self.send(CueCommand::PlayWarning);
    }

    pub fn stop_all(&self) {
        self.send(CueCommand::StopAll);
    }
}
