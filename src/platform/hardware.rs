//! Button and frame capabilities, with sysfs, console and in-memory backends.
//!
//! The core only sees [`ButtonInput::read_edge`] and [`FrameSink::draw`].
//! Failing to open a backend is the one fatal startup condition; read and
//! draw failures later on are reported to the caller and retried next tick.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::config::{HardwareBackend, HardwareConfig};
use crate::core::errors::{PanelError, Result};
use crate::ui::state::Button;
use crate::ui::view::{ViewModel, render_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    None,
    Pressed,
}

/// Non-blocking edge source, sampled once per button per short tick.
pub trait ButtonInput: Send {
    fn read_edge(&mut self, button: Button) -> Result<ButtonEdge>;
}

/// Hands a composed view model to whatever drives the pixels.
pub trait FrameSink: Send {
    fn draw(&mut self, view: &ViewModel) -> Result<()>;
}

/// Opened button + frame backends.
pub struct PanelHardware {
    pub buttons: Box<dyn ButtonInput>,
    pub frames: Box<dyn FrameSink>,
}

impl PanelHardware {
    pub fn open(config: &HardwareConfig) -> Result<Self> {
        match config.backend {
            HardwareBackend::Sysfs => Ok(Self {
                buttons: Box::new(SysfsButtons::open(
                    &config.button_a_path,
                    &config.button_b_path,
                    config.active_low,
                )?),
                frames: Box::new(JsonFrameFile::open(&config.frame_path)?),
            }),
            HardwareBackend::Console => Ok(Self {
                buttons: Box::new(ConsoleButtons::spawn()?),
                frames: Box::new(TextFrameSink::new(io::stdout())),
            }),
        }
    }
}

// ──────────────────── sysfs ────────────────────

/// GPIO value files (`/sys/class/gpio/gpioN/value`). A press is the
/// transition from released to pressed.
#[derive(Debug)]
pub struct SysfsButtons {
    paths: [PathBuf; 2],
    active_low: bool,
    pressed: [bool; 2],
}

impl SysfsButtons {
    pub fn open(a: &Path, b: &Path, active_low: bool) -> Result<Self> {
        let mut buttons = Self {
            paths: [a.to_path_buf(), b.to_path_buf()],
            active_low,
            pressed: [false; 2],
        };
        for button in Button::ALL {
            let device = match button {
                Button::A => "button_a",
                Button::B => "button_b",
            };
            // Seed the level so a button held at startup does not fire.
            buttons.pressed[button.index()] =
                buttons.level(button).map_err(|e| PanelError::Hardware {
                    device,
                    details: e.to_string(),
                })?;
        }
        Ok(buttons)
    }

    fn level(&self, button: Button) -> Result<bool> {
        let path = &self.paths[button.index()];
        let raw = fs::read_to_string(path).map_err(|e| PanelError::io(path, e))?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(PanelError::Runtime {
                    details: format!("unexpected GPIO value {other:?} in {}", path.display()),
                });
            }
        };
        Ok(high != self.active_low)
    }
}

impl ButtonInput for SysfsButtons {
    fn read_edge(&mut self, button: Button) -> Result<ButtonEdge> {
        let now = self.level(button)?;
        let was = std::mem::replace(&mut self.pressed[button.index()], now);
        Ok(if now && !was {
            ButtonEdge::Pressed
        } else {
            ButtonEdge::None
        })
    }
}

/// Publishes each frame as JSON, replacing the file atomically.
#[derive(Debug)]
pub struct JsonFrameFile {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl JsonFrameFile {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| PanelError::Hardware {
                device: "frame_file",
                details: format!("{}: {e}", parent.display()),
            })?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path: path.with_file_name(tmp_name),
        })
    }
}

impl FrameSink for JsonFrameFile {
    fn draw(&mut self, view: &ViewModel) -> Result<()> {
        let json = serde_json::to_vec(view)?;
        fs::write(&self.tmp_path, json)
            .and_then(|()| fs::rename(&self.tmp_path, &self.path))
            .map_err(|e| PanelError::Render {
                details: format!("{}: {e}", self.path.display()),
            })
    }
}

// ──────────────────── console ────────────────────

/// Reads `a` / `b` lines from stdin on a background thread.
pub struct ConsoleButtons {
    rx: Receiver<Button>,
    pending: [usize; 2],
}

impl ConsoleButtons {
    const QUEUE: usize = 32;

    pub fn spawn() -> Result<Self> {
        let (tx, rx) = bounded(Self::QUEUE);
        thread::Builder::new()
            .name("aspanel-console".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    for button in parse_console_line(&line) {
                        match tx.try_send(button) {
                            Ok(()) | Err(TrySendError::Full(_)) => {}
                            Err(TrySendError::Disconnected(_)) => return,
                        }
                    }
                }
            })
            .map_err(|e| PanelError::Hardware {
                device: "console",
                details: e.to_string(),
            })?;
        Ok(Self::from_receiver(rx))
    }

    #[must_use]
    pub const fn from_receiver(rx: Receiver<Button>) -> Self {
        Self {
            rx,
            pending: [0; 2],
        }
    }
}

impl ButtonInput for ConsoleButtons {
    fn read_edge(&mut self, button: Button) -> Result<ButtonEdge> {
        while let Ok(pressed) = self.rx.try_recv() {
            self.pending[pressed.index()] += 1;
        }
        let slot = &mut self.pending[button.index()];
        if *slot == 0 {
            return Ok(ButtonEdge::None);
        }
        *slot -= 1;
        Ok(ButtonEdge::Pressed)
    }
}

/// `a`, `b`, or a run like `aab`; anything else is ignored.
fn parse_console_line(line: &str) -> Vec<Button> {
    let trimmed = line.trim();
    if !trimmed.chars().all(|c| matches!(c, 'a' | 'b' | 'A' | 'B')) {
        return Vec::new();
    }
    trimmed
        .chars()
        .map(|c| if c.eq_ignore_ascii_case(&'a') { Button::A } else { Button::B })
        .collect()
}

/// Writes each distinct frame as text.
pub struct TextFrameSink<W: Write + Send> {
    out: W,
    last: Option<String>,
}

impl<W: Write + Send> TextFrameSink<W> {
    pub const fn new(out: W) -> Self {
        Self { out, last: None }
    }
}

impl<W: Write + Send> FrameSink for TextFrameSink<W> {
    fn draw(&mut self, view: &ViewModel) -> Result<()> {
        let text = render_text(view);
        if self.last.as_deref() == Some(text.as_str()) {
            return Ok(());
        }
        writeln!(self.out, "{text}\n----")
            .and_then(|()| self.out.flush())
            .map_err(|e| PanelError::Render {
                details: e.to_string(),
            })?;
        self.last = Some(text);
        Ok(())
    }
}

// ──────────────────── in-memory ────────────────────

/// Replays queued presses; used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedButtons {
    queue: Arc<Mutex<VecDeque<Button>>>,
}

impl ScriptedButtons {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, button: Button) {
        self.queue.lock().push_back(button);
    }
}

impl ButtonInput for ScriptedButtons {
    fn read_edge(&mut self, button: Button) -> Result<ButtonEdge> {
        let mut queue = self.queue.lock();
        if queue.front() == Some(&button) {
            queue.pop_front();
            return Ok(ButtonEdge::Pressed);
        }
        Ok(ButtonEdge::None)
    }
}

/// Keeps every drawn frame. Can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<ViewModel>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn frames(&self) -> Vec<ViewModel> {
        self.frames.lock().clone()
    }

    #[must_use]
    pub fn last(&self) -> Option<ViewModel> {
        self.frames.lock().last().cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl FrameSink for RecordingSink {
    fn draw(&mut self, view: &ViewModel) -> Result<()> {
        if *self.failing.lock() {
            return Err(PanelError::Render {
                details: "recording sink set to fail".to_string(),
            });
        }
        self.frames.lock().push(view.clone());
        Ok(())
    }
}
