//! Core trait definitions

mod session;

pub use session::{SessionControl, SessionState};
