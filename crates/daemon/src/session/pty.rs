//! PTY-backed process backend.
//!
//! A [`PtyBackend`] owns one child process attached to the slave side of a
//! pseudo-terminal. Reads and writes go straight to the master descriptor,
//! which is switched to non-blocking mode and driven by tokio's [`AsyncFd`].
//! A blocking watcher task reaps the child, drains whatever output is still
//! buffered, closes the PTY master and fires the exit signal exactly once.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::io::unix::AsyncFd;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::backend::{Backend, BackendFactory, ExitSignal, SessionError};

/// Environment every child starts with, before the parent's and the extras.
const DEFAULT_ENVIRONMENT: [&str; 4] = [
    "TERM=xterm",
    "LANG=en_US.UTF-8",
    "LC_ALL=en_US.UTF-8",
    "LANGUAGE=en_US.UTF-8",
];

/// Upper bound on output kept from the PTY after the child exits.
const TAIL_LIMIT: usize = 64 * 1024;

/// Default terminal width in columns.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height in rows.
pub const DEFAULT_ROWS: u16 = 24;

/// Options applied when spawning a [`PtyBackend`].
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Working directory of the child. Defaults to the daemon's own.
    pub working_directory: Option<PathBuf>,

    /// `KEY=VALUE` entries applied after everything else.
    pub extra_environment: Vec<String>,

    /// Whether the child sees the daemon's environment.
    pub inherit_parent_environment: bool,

    /// When this token is cancelled the child is killed.
    pub cancellation_scope: Option<CancellationToken>,

    /// Terminal size at spawn, as `(cols, rows)`.
    pub initial_size: (u16, u16),
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            working_directory: None,
            extra_environment: Vec::new(),
            inherit_parent_environment: true,
            cancellation_scope: None,
            initial_size: (DEFAULT_COLS, DEFAULT_ROWS),
        }
    }
}

impl PtyConfig {
    /// The child's environment, in application order.
    ///
    /// Duplicate keys are kept; the last occurrence wins when applied.
    pub fn environment(&self) -> Vec<String> {
        let mut env: Vec<String> = DEFAULT_ENVIRONMENT.iter().map(|s| s.to_string()).collect();

        if self.inherit_parent_environment {
            env.extend(std::env::vars_os().filter_map(|(key, value)| {
                Some(format!("{}={}", key.to_str()?, value.to_str()?))
            }));
        }

        env.extend(self.extra_environment.iter().cloned());
        env
    }
}

/// Splits a command line on whitespace into a binary and its arguments.
pub fn split_command(command: &str) -> Result<(String, Vec<String>), SessionError> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let bin = parts
        .next()
        .ok_or_else(|| SessionError::SpawnFailed("empty command".to_string()))?;
    Ok((bin, parts.collect()))
}

/// State shared with the watcher task.
struct Shared {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    descriptor: Mutex<Option<Arc<AsyncFd<File>>>>,
    /// Output read off the PTY by the watcher, served to readers after exit.
    tail: Mutex<VecDeque<u8>>,
    exit_code: Mutex<Option<u32>>,
    exited: CancellationToken,
}

impl Shared {
    fn master(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn MasterPty + Send>>> {
        self.master.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn descriptor(&self) -> Option<Arc<AsyncFd<File>>> {
        self.descriptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs once, after the child has been reaped.
    ///
    /// The descriptor is closed here unless a reader still holds it; such a
    /// reader drops its copy as soon as it sees the exit signal.
    fn finish(&self, exit_code: Option<u32>) {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner) = exit_code;

        let descriptor = self
            .descriptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(fd) = descriptor {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            drain_into(fd.get_ref(), &mut tail);
        }

        self.master().take();
        self.exited.cancel();
    }

    /// Serves output drained at exit, then fails once it is used up.
    fn read_tail(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.is_empty() {
            return Err(process_exited());
        }
        let n = buf.len().min(tail.len());
        for (slot, byte) in buf.iter_mut().zip(tail.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// A child process running on a pseudo-terminal.
pub struct PtyBackend {
    command: String,
    pid: Option<u32>,
    shared: Arc<Shared>,
}

impl PtyBackend {
    /// Spawns `command` on a fresh PTY.
    ///
    /// Must be called from within a tokio runtime. Nothing is left running if
    /// this returns an error.
    pub fn spawn(command: &str, config: PtyConfig) -> Result<Self, SessionError> {
        let runtime =
            Handle::try_current().map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let (bin, args) = split_command(command)?;

        let cwd = match &config.working_directory {
            Some(dir) if !dir.is_dir() => {
                return Err(SessionError::SpawnFailed(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
            Some(dir) => Some(dir.clone()),
            None => std::env::current_dir().ok(),
        };

        let (cols, rows) = config.initial_size;
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let descriptor = async_descriptor(pair.master.as_ref())?;

        let mut cmd = CommandBuilder::new(&bin);
        cmd.args(&args);
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }
        cmd.env_clear();
        for entry in config.environment() {
            match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    cmd.env(key, value);
                }
                _ => {
                    tracing::warn!(entry = %entry, "Skipping malformed environment entry");
                }
            }
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        drop(pair.slave);

        let pid = child.process_id();
        let shared = Arc::new(Shared {
            master: Mutex::new(Some(pair.master)),
            descriptor: Mutex::new(Some(Arc::new(descriptor))),
            tail: Mutex::new(VecDeque::new()),
            exit_code: Mutex::new(None),
            exited: CancellationToken::new(),
        });

        tracing::info!(command = %command, pid = ?pid, cols, rows, "Spawned PTY process");

        let watcher = Arc::clone(&shared);
        let label = command.to_string();
        runtime.spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    tracing::warn!(command = %label, error = %e, "Failed to wait for PTY process");
                    None
                }
            };
            tracing::info!(command = %label, exit_code = ?code, "PTY process exited");
            watcher.finish(code);
        });

        if let Some(scope) = config.cancellation_scope {
            let exited = shared.exited.clone();
            runtime.spawn(async move {
                tokio::select! {
                    _ = scope.cancelled() => {
                        if let Err(e) = kill_process(pid) {
                            tracing::warn!(pid = ?pid, error = %e, "Failed to kill PTY process on cancellation");
                        }
                    }
                    _ = exited.cancelled() => {}
                }
            });
        }

        Ok(Self {
            command: command.to_string(),
            pid,
            shared,
        })
    }

    /// Returns the command line this backend was spawned with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the process ID of the child, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the child's exit code once it has been reaped.
    pub fn exit_code(&self) -> Option<u32> {
        *self
            .shared
            .exit_code
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Backend for PtyBackend {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(fd) = self.shared.descriptor() else {
            return self.shared.read_tail(buf);
        };
        loop {
            let mut guard = tokio::select! {
                guard = fd.readable() => guard?,
                _ = self.shared.exited.cancelled() => return self.shared.read_tail(buf),
            };

            let result = guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(buf)
            });
            drop(guard);

            match result {
                Ok(Ok(n)) => return Ok(n),
                // EIO: the slave side hung up. The watcher fires shortly.
                Ok(Err(e)) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                    drop(fd);
                    self.shared.exited.cancelled().await;
                    return self.shared.read_tail(buf);
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.exited.is_cancelled() {
            return Err(process_exited());
        }
        let fd = self.shared.descriptor().ok_or_else(process_exited)?;
        loop {
            let mut guard = tokio::select! {
                guard = fd.writable() => guard?,
                _ = self.shared.exited.cancelled() => return Err(process_exited()),
            };

            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.write(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    fn resize(&self, width: u16, height: u16) -> Result<(), SessionError> {
        let master = self.shared.master();
        let master = master
            .as_ref()
            .ok_or_else(|| SessionError::ResizeFailed("process exited".to_string()))?;
        master
            .resize(PtySize {
                rows: height,
                cols: width,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        tracing::debug!(pid = ?self.pid, cols = width, rows = height, "Resized PTY");
        Ok(())
    }

    fn window_size(&self) -> Result<(u16, u16), SessionError> {
        let master = self.shared.master();
        let master = master
            .as_ref()
            .ok_or_else(|| SessionError::ResizeFailed("process exited".to_string()))?;
        let size = master
            .get_size()
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        Ok((size.cols, size.rows))
    }

    fn exit_signal(&self) -> ExitSignal {
        ExitSignal::new(self.shared.exited.clone())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if !self.shared.exited.is_cancelled() {
            kill_process(self.pid)?;
        }
        self.shared.exited.cancelled().await;
        Ok(())
    }
}

impl Drop for PtyBackend {
    fn drop(&mut self) {
        if !self.shared.exited.is_cancelled() {
            let _ = kill_process(self.pid);
        }
    }
}

/// Spawns a [`PtyBackend`] for every new session.
#[derive(Debug, Clone)]
pub struct PtyFactory {
    command: String,
    config: PtyConfig,
}

impl PtyFactory {
    pub fn new(command: impl Into<String>, config: PtyConfig) -> Self {
        Self {
            command: command.into(),
            config,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl BackendFactory for PtyFactory {
    fn create(&self) -> Result<Box<dyn Backend>, SessionError> {
        let backend = PtyBackend::spawn(&self.command, self.config.clone())?;
        Ok(Box::new(backend))
    }
}

/// Sends SIGKILL. A process that is already gone is not an error.
fn kill_process(pid: Option<u32>) -> Result<(), SessionError> {
    let pid = pid.ok_or_else(|| SessionError::KillFailed("process id unavailable".to_string()))?;
    let pid = i32::try_from(pid).map_err(|e| SessionError::KillFailed(e.to_string()))?;
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SessionError::KillFailed(e.to_string())),
    }
}

/// Duplicates the master descriptor and registers the copy with the reactor.
fn async_descriptor(master: &(dyn MasterPty + Send)) -> Result<AsyncFd<File>, SessionError> {
    let raw = master
        .as_raw_fd()
        .ok_or_else(|| SessionError::SpawnFailed("PTY master has no descriptor".to_string()))?;

    // SAFETY: `raw` belongs to `master`, which outlives this borrow.
    let owned = unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned()?;
    let file = File::from(owned);

    let flags = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags))
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

    Ok(AsyncFd::new(file)?)
}

/// Reads what the PTY still holds, up to [`TAIL_LIMIT`] bytes in total.
fn drain_into(mut file: &File, tail: &mut VecDeque<u8>) {
    let mut chunk = [0u8; 4096];
    while tail.len() < TAIL_LIMIT {
        match file.read(&mut chunk) {
            Ok(n) if n > 0 => tail.extend(&chunk[..n]),
            _ => break,
        }
    }
}

fn process_exited() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "process exited")
}
