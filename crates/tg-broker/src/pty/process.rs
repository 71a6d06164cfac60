//! PTY-backed child process

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::FromRawFd;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tg_core::{SessionError, SpawnError};
use tg_protocol::TerminalSize;
use tokio::sync::watch;

use super::reader::{PtyReader, ReadOutcome};
use super::signal::{self, Signal};

/// Exit information published by the reaper thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the wait itself succeeded
    pub code: Option<u32>,
}

/// How a termination request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process had already exited; nothing was signalled
    AlreadyExited,
    /// Exited after SIGTERM
    Terminated,
    /// Needed SIGKILL
    Killed,
    /// Still alive after SIGKILL and the second wait
    Unresponsive,
}

struct PtyIo {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    stopping: bool,
    size: TerminalSize,
}

/// A process running on the slave side of a PTY
///
/// The writer, the master (for resizes) and the stop flag share one lock.
/// Reads from the [`PtyReader`] also happen under it, so a stop request is
/// never interleaved with an in-flight read.
pub struct PtyProcess {
    pid: u32,
    io: Mutex<PtyIo>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

/// Spawn `argv` on a new PTY
///
/// `env` is added on top of the broker's own environment.
pub fn spawn(
    argv: &[String],
    env: &[(String, String)],
    size: TerminalSize,
) -> Result<(PtyProcess, PtyReader), SpawnError> {
    let (program, args) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;
    let size = if size.is_empty() {
        TerminalSize::default()
    } else {
        size
    };

    tracing::debug!(
        "Spawning {} on a {}x{} PTY",
        program,
        size.cols,
        size.rows
    );

    let pair = native_pty_system()
        .openpty(pty_size(size))
        .map_err(|e| SpawnError::Pty(format!("{:#}", e)))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| SpawnError::Exec {
            program: program.clone(),
            message: format!("{:#}", e),
        })?;
    // Keep no slave handle in the broker so the master sees EOF on exit
    drop(pair.slave);

    let pid = match child.process_id() {
        Some(pid) => pid,
        None => {
            let _ = child.kill();
            return Err(SpawnError::Exec {
                program: program.clone(),
                message: "process id unavailable".to_string(),
            });
        }
    };

    let reader = match dup_reader(pair.master.as_ref()) {
        Ok(file) => PtyReader::new(file),
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SpawnError::Pty(format!("failed to duplicate PTY reader: {}", e)));
        }
    };
    let writer = match pair.master.take_writer() {
        Ok(writer) => writer,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SpawnError::Pty(format!("failed to take PTY writer: {:#}", e)));
        }
    };

    let (exit_tx, exit_rx) = watch::channel(None);
    let reaper = std::thread::Builder::new()
        .name(format!("tg-reap-{}", pid))
        .spawn(move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    tracing::warn!("Failed to wait for pid {}: {}", pid, e);
                    None
                }
            };
            tracing::debug!("Process {} exited (code {:?})", pid, code);
            exit_tx.send_replace(Some(ProcessExit { code }));
        });
    if let Err(e) = reaper {
        // The closure (and the child handle) is gone; kill by pid instead
        let _ = signal::signal_group(pid, Signal::Kill);
        return Err(SpawnError::Exec {
            program: program.clone(),
            message: format!("failed to start reaper thread: {}", e),
        });
    }

    tracing::info!("Spawned {} with PID {}", program, pid);

    let process = PtyProcess {
        pid,
        io: Mutex::new(PtyIo {
            master: Some(pair.master),
            writer: Some(writer),
            stopping: false,
            size,
        }),
        exit_rx,
    };
    Ok((process, reader))
}

impl PtyProcess {
    /// Process ID (also the process-group ID)
    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn io(&self) -> MutexGuard<'_, PtyIo> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward input to the process
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut io = self.io();
        if io.stopping {
            return Err(SessionError::Closed);
        }
        let writer = io.writer.as_mut().ok_or(SessionError::Closed)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Change the window size
    ///
    /// Ignored once the PTY is closed or when either dimension is zero.
    pub fn resize(&self, size: TerminalSize) {
        if size.is_empty() {
            return;
        }

        let mut io = self.io();
        let Some(master) = io.master.as_ref() else {
            return;
        };
        match master.resize(pty_size(size)) {
            Ok(()) => {
                tracing::debug!("Resized pid {} to {}x{}", self.pid, size.cols, size.rows);
                io.size = size;
            }
            Err(e) => tracing::debug!("Resize of pid {} failed: {:#}", self.pid, e),
        }
    }

    /// Current window size
    pub fn size(&self) -> TerminalSize {
        self.io().size
    }

    /// Raise the stop flag; returns whether it was already raised
    pub fn begin_stop(&self) -> bool {
        std::mem::replace(&mut self.io().stopping, true)
    }

    /// Whether a stop has been requested
    pub fn is_stopping(&self) -> bool {
        self.io().stopping
    }

    /// Drop the writer and master handles
    pub fn close_io(&self) {
        let mut io = self.io();
        io.stopping = true;
        io.writer.take();
        io.master.take();
    }

    pub(crate) fn read_chunk(&self, reader: &mut PtyReader, buf: &mut [u8]) -> ReadOutcome {
        let io = self.io();
        if io.stopping {
            return ReadOutcome::Stopped;
        }
        reader.read_into(buf)
    }

    /// Exit status, once the reaper has collected it
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Whether the process has been reaped
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait up to `timeout` for the process to exit
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.exit_rx.clone();
        let exited = tokio::time::timeout(timeout, rx.wait_for(|exit| exit.is_some()))
            .await
            .is_ok();
        exited || self.has_exited()
    }

    /// Terminate the process group, escalating to SIGKILL
    ///
    /// Each phase waits up to `escalation`. Safe to call repeatedly.
    pub async fn terminate(&self, escalation: Duration) -> Termination {
        if self.has_exited() {
            return Termination::AlreadyExited;
        }

        if let Err(e) = signal::signal_group(self.pid, Signal::Terminate) {
            tracing::warn!("Failed to send SIGTERM to {}: {}", self.pid, e);
        }
        if self.wait_for_exit(escalation).await {
            return Termination::Terminated;
        }

        tracing::warn!(
            "Process {} ignored SIGTERM for {:?}, sending SIGKILL",
            self.pid,
            escalation
        );
        if let Err(e) = signal::signal_group(self.pid, Signal::Kill) {
            tracing::warn!("Failed to send SIGKILL to {}: {}", self.pid, e);
        }
        if self.wait_for_exit(escalation).await {
            return Termination::Killed;
        }

        tracing::warn!("Process {} still running after SIGKILL, giving up", self.pid);
        Termination::Unresponsive
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if !self.has_exited() && signal::process_exists(self.pid) {
            tracing::debug!("Killing orphaned process {}", self.pid);
            let _ = signal::signal_group(self.pid, Signal::Kill);
        }
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn dup_reader(master: &dyn MasterPty) -> io::Result<File> {
    let fd = master
        .as_raw_fd()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "PTY master has no fd"))?;

    // SAFETY: `fd` is a live descriptor owned by `master`; F_DUPFD_CLOEXEC
    // returns a new descriptor that we take sole ownership of.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `dup` was just created and is not owned elsewhere.
    Ok(unsafe { File::from_raw_fd(dup) })
}
