//! Side effects on the host: clicking the leave control, toggling the
//! session recorder, and putting the machine to sleep.
//!
//! Everything here shells out to platform tools so the watcher core stays
//! testable; each concern sits behind a trait with a no-op or recording
//! double for tests.

use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Moves the pointer and presses the primary button.
pub trait PointerSink: Send {
    /// Click at absolute screen coordinates, holding the button for
    /// `press` before releasing.
    fn click(&self, x: u32, y: u32, press: Duration) -> Result<()>;
}

/// Drives the platform pointer tool: `cliclick` on macOS, `xdotool` on
/// Linux, PowerShell on Windows.
pub struct DesktopPointer;

impl PointerSink for DesktopPointer {
    #[cfg(target_os = "macos")]
    fn click(&self, x: u32, y: u32, press: Duration) -> Result<()> {
        run(Command::new("cliclick")
            .arg(format!("dd:{},{}", x, y))
            .arg(format!("w:{}", press.as_millis()))
            .arg(format!("du:{},{}", x, y)))
    }

    #[cfg(target_os = "linux")]
    fn click(&self, x: u32, y: u32, press: Duration) -> Result<()> {
        run(Command::new("xdotool")
            .args(["mousemove", &x.to_string(), &y.to_string()]))?;
        run(Command::new("xdotool").args(["mousedown", "1"]))?;
        std::thread::sleep(press);
        run(Command::new("xdotool").args(["mouseup", "1"]))
    }

    #[cfg(target_os = "windows")]
    fn click(&self, x: u32, y: u32, press: Duration) -> Result<()> {
        let script = format!(
            "[System.Windows.Forms.Cursor]::Position = New-Object System.Drawing.Point({x}, {y}); \
             $sig = '[DllImport(\"user32.dll\")] public static extern void mouse_event(int f, int x, int y, int d, int e);'; \
             $m = Add-Type -MemberDefinition $sig -Name M -PassThru; \
             $m::mouse_event(0x0002, 0, 0, 0, 0); \
             Start-Sleep -Milliseconds {ms}; \
             $m::mouse_event(0x0004, 0, 0, 0, 0)",
            x = x,
            y = y,
            ms = press.as_millis(),
        );
        run(Command::new("powershell").args([
            "-NoProfile",
            "-Command",
            &format!("Add-Type -AssemblyName System.Windows.Forms; {script}"),
        ]))
    }
}

/// Starts and stops the session recorder.
pub trait RecordingControl: Send {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

/// Invokes configured shell commands to control an external recorder.
pub struct CommandRecorder {
    start_cmd: String,
    stop_cmd: String,
}

impl CommandRecorder {
    pub fn new(start_cmd: String, stop_cmd: String) -> Self {
        Self { start_cmd, stop_cmd }
    }
}

impl RecordingControl for CommandRecorder {
    fn start(&self) -> Result<()> {
        run_shell(&self.start_cmd)
    }

    fn stop(&self) -> Result<()> {
        run_shell(&self.stop_cmd)
    }
}

/// Recording disabled in config.
pub struct NullRecorder;

impl RecordingControl for NullRecorder {
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Puts the machine to sleep.
pub trait PowerControl: Send {
    fn suspend(&self) -> Result<()>;
}

pub struct SystemSuspend;

impl PowerControl for SystemSuspend {
    #[cfg(target_os = "macos")]
    fn suspend(&self) -> Result<()> {
        run(Command::new("pmset").arg("sleepnow"))
    }

    #[cfg(target_os = "linux")]
    fn suspend(&self) -> Result<()> {
        run(Command::new("systemctl").arg("suspend"))
    }

    #[cfg(target_os = "windows")]
    fn suspend(&self) -> Result<()> {
        run(Command::new("rundll32.exe").args(["powrprof.dll,SetSuspendState", "0,1,0"]))
    }
}

fn run(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .status()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;
    if !status.success() {
        return Err(anyhow!("{:?} exited with {}", cmd.get_program(), status));
    }
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run_shell(line: &str) -> Result<()> {
    run(Command::new("sh").args(["-c", line]))
}

#[cfg(target_os = "windows")]
fn run_shell(line: &str) -> Result<()> {
    run(Command::new("cmd").args(["/C", line]))
}
