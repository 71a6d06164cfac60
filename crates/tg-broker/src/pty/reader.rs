//! PTY output read loop

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::time::Duration;

use tg_protocol::ServerMessage;

use super::process::PtyProcess;

/// Largest single read from the PTY
pub const READ_CHUNK_SIZE: usize = 4096;

/// Readiness poll interval; bounds how long a stop request goes unnoticed
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read end of a PTY master, duplicated from the master's descriptor
pub struct PtyReader {
    file: File,
}

pub(crate) enum ReadOutcome {
    Data(usize),
    Retry,
    Stopped,
    Eof,
    Failed(io::Error),
}

impl PtyReader {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }

    /// Wait up to `timeout` for the descriptor to become readable
    ///
    /// Hang-up and error conditions also count as readable so the next read
    /// reports them.
    pub fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pfd` is a valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(rc > 0)
    }

    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match self.file.read(buf) {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                ReadOutcome::Retry
            }
            // Linux reports EIO on the master once the slave side is gone
            Err(e) if e.raw_os_error() == Some(libc::EIO) => ReadOutcome::Eof,
            Err(e) => ReadOutcome::Failed(e),
        }
    }
}

/// Incremental UTF-8 decoder for PTY output
///
/// Incomplete sequences at the end of a chunk are held for the next one;
/// invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, returning all text that is complete so far
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut start = 0;
        while start < buf.len() {
            match std::str::from_utf8(&buf[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = buf.len();
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&buf[start..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = buf.split_off(start);
        out
    }

    /// Flush a dangling partial sequence at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Pump PTY output into `emit` until EOF, an I/O error or a stop request
///
/// Runs on a dedicated thread. Always finishes with [`ServerMessage::Exit`].
pub fn run_read_loop<F>(process: &PtyProcess, mut reader: PtyReader, mut emit: F)
where
    F: FnMut(ServerMessage),
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut decoder = Utf8Decoder::new();

    loop {
        if process.is_stopping() {
            break;
        }

        match reader.wait_readable(READ_POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::debug!("Poll failed for pid {}: {}", process.pid(), e);
                break;
            }
        }

        match process.read_chunk(&mut reader, &mut buf) {
            ReadOutcome::Data(n) => {
                let data = decoder.decode(&buf[..n]);
                if !data.is_empty() {
                    emit(ServerMessage::Output { data });
                }
            }
            ReadOutcome::Retry => continue,
            ReadOutcome::Stopped | ReadOutcome::Eof => break,
            ReadOutcome::Failed(e) => {
                tracing::debug!("Read failed for pid {}: {}", process.pid(), e);
                break;
            }
        }
    }

    if let Some(data) = decoder.finish() {
        emit(ServerMessage::Output { data });
    }

    match process.exit_status() {
        Some(exit) => tracing::debug!(
            "Reader for pid {} finished, exit code {:?}",
            process.pid(),
            exit.code
        ),
        None => tracing::debug!("Reader for pid {} finished", process.pid()),
    }
    emit(ServerMessage::Exit);
}
