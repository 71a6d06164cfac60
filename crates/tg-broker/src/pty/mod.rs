//! Pseudo-terminal process control
//!
//! Spawns session processes on a PTY via portable-pty, bridges their I/O
//! and tears them down with SIGTERM/SIGKILL escalation. Unix only: teardown
//! signals the whole process group.

mod process;
mod reader;
mod signal;

pub use process::{spawn, ProcessExit, PtyProcess, Termination};
pub use reader::{run_read_loop, PtyReader, Utf8Decoder, READ_CHUNK_SIZE, READ_POLL_INTERVAL};
pub use signal::{signal_group, Signal};
