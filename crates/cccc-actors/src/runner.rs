//! Process runners: `PtyRunner` attaches a pseudo-terminal, `HeadlessRunner`
//! pipes stdout/stderr without one (spec §4.4). Both adapt the
//! spawn-plus-background-reader shape of a terminal session: a blocking OS
//! thread (or async task) drains output into a bounded in-memory buffer so
//! the caller never blocks on actor I/O.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use crate::error::{ActorError, Result};

/// Bytes kept in the output ring buffer before the oldest data is dropped.
const OUTPUT_BUF_MAX: usize = 256 * 1024;

fn activity_clock() -> Arc<AtomicI64> {
    Arc::new(AtomicI64::new(Utc::now().timestamp_millis()))
}

fn touch(clock: &AtomicI64) {
    clock.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
}

fn read_activity(clock: &AtomicI64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(clock.load(Ordering::Relaxed))
}

/// A running managed process, PTY-backed or headless.
pub trait Runner: Send + Sync {
    fn write(&self, input: &[u8]) -> Result<()>;
    fn drain_output(&self) -> String;
    fn resize(&self, cols: u16, rows: u16) -> Result<()>;
    fn is_alive(&self) -> bool;
    fn pid(&self) -> Option<u32>;
    fn kill(&self);
    /// `true` if this runner should wrap injected text in bracketed-paste
    /// markers (spec §4.5) before writing it.
    fn supports_bracketed_paste(&self) -> bool;
    /// Timestamp of the last byte read from the process's output, used by
    /// the actor-idle automation policy (spec §4.6).
    fn last_activity_at(&self) -> Option<DateTime<Utc>>;
}

pub struct SpawnSpec<'a> {
    pub command: &'a [String],
    pub cwd: &'a Path,
    pub env: &'a HashMap<String, String>,
}

pub struct PtyRunner {
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    output_buf: Arc<Mutex<String>>,
    alive: Arc<AtomicBool>,
    activity: Arc<AtomicI64>,
    pid: Option<u32>,
}

impl PtyRunner {
    pub fn spawn(spec: SpawnSpec<'_>) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ActorError::Spawn(e.to_string()))?;

        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| ActorError::Spawn("empty command".into()))?;
        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(spec.cwd);
        for (k, v) in spec.env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ActorError::Spawn(e.to_string()))?;
        let pid = child.process_id();
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ActorError::Spawn(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ActorError::Spawn(e.to_string()))?;

        let output_buf = Arc::new(Mutex::new(String::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let activity = activity_clock();
        let buf_clone = Arc::clone(&output_buf);
        let alive_clone = Arc::clone(&alive);
        let activity_clone = Arc::clone(&activity);

        std::thread::spawn(move || {
            let mut raw = [0u8; 4096];
            loop {
                match reader.read(&mut raw) {
                    Ok(0) => break,
                    Ok(n) => {
                        touch(&activity_clone);
                        let clean = strip_ansi_escapes::strip(&raw[..n]);
                        let text = String::from_utf8_lossy(&clean).into_owned();
                        let mut guard = buf_clone.lock().unwrap();
                        guard.push_str(&text);
                        if guard.len() > OUTPUT_BUF_MAX {
                            let excess = guard.len() - OUTPUT_BUF_MAX;
                            guard.drain(..excess);
                        }
                    }
                    Err(e) => {
                        warn!("pty reader error: {e}");
                        break;
                    }
                }
            }
            alive_clone.store(false, Ordering::Release);
            debug!("pty reader thread exited");
        });

        Ok(Self {
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            output_buf,
            alive,
            activity,
            pid,
        })
    }
}

impl Runner for PtyRunner {
    fn write(&self, input: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().unwrap();
        guard.write_all(input)?;
        guard.flush()?;
        Ok(())
    }

    fn drain_output(&self) -> String {
        let mut guard = self.output_buf.lock().unwrap();
        std::mem::take(&mut *guard)
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = self.master.lock().unwrap();
        guard
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ActorError::Spawn(e.to_string()))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&self) {
        // Ctrl-D — clean EOF for most interactive shells/REPLs.
        let _ = self.write(b"\x04");
    }

    fn supports_bracketed_paste(&self) -> bool {
        true
    }

    fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        read_activity(&self.activity)
    }
}

/// Headless runner: same background-thread-drains-into-ring-buffer shape as
/// `PtyRunner`, built on `std::process::Command` instead of a PTY pair so
/// stdin/stdout/stderr stay plain pipes with no pseudo-terminal semantics.
pub struct HeadlessRunner {
    child: Mutex<std::process::Child>,
    stdin: Mutex<Option<std::process::ChildStdin>>,
    output_buf: Arc<Mutex<String>>,
    alive: Arc<AtomicBool>,
    activity: Arc<AtomicI64>,
    pid: Option<u32>,
}

impl HeadlessRunner {
    pub fn spawn(spec: SpawnSpec<'_>) -> Result<Self> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| ActorError::Spawn("empty command".into()))?;
        let mut child = std::process::Command::new(program)
            .args(args)
            .current_dir(spec.cwd)
            .envs(spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ActorError::Spawn(e.to_string()))?;

        let pid = Some(child.id());
        let output_buf = Arc::new(Mutex::new(String::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let activity = activity_clock();
        let stdin = child.stdin.take();

        if let Some(stdout) = child.stdout.take() {
            spawn_drain_thread(stdout, Arc::clone(&output_buf), Arc::clone(&activity));
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_drain_thread(stderr, Arc::clone(&output_buf), Arc::clone(&activity));
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            output_buf,
            alive,
            activity,
            pid,
        })
    }
}

fn spawn_drain_thread(mut source: impl Read + Send + 'static, buf: Arc<Mutex<String>>, activity: Arc<AtomicI64>) {
    std::thread::spawn(move || {
        let mut raw = [0u8; 4096];
        loop {
            match source.read(&mut raw) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    touch(&activity);
                    let clean = strip_ansi_escapes::strip(&raw[..n]);
                    let text = String::from_utf8_lossy(&clean).into_owned();
                    let mut guard = buf.lock().unwrap();
                    guard.push_str(&text);
                    if guard.len() > OUTPUT_BUF_MAX {
                        let excess = guard.len() - OUTPUT_BUF_MAX;
                        guard.drain(..excess);
                    }
                }
            }
        }
    });
}

impl Runner for HeadlessRunner {
    fn write(&self, input: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().unwrap();
        match guard.as_mut() {
            Some(stdin) => {
                stdin.write_all(input)?;
                stdin.flush()?;
                Ok(())
            }
            None => Err(ActorError::NotRunning("stdin closed".into())),
        }
    }

    fn drain_output(&self) -> String {
        let mut guard = self.output_buf.lock().unwrap();
        std::mem::take(&mut *guard)
    }

    fn resize(&self, _cols: u16, _rows: u16) -> Result<()> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().unwrap();
        match guard.try_wait() {
            Ok(Some(_)) => {
                self.alive.store(false, Ordering::Release);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&self) {
        *self.stdin.lock().unwrap() = None;
        let mut guard = self.child.lock().unwrap();
        let _ = guard.kill();
    }

    fn supports_bracketed_paste(&self) -> bool {
        false
    }

    fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        read_activity(&self.activity)
    }
}
