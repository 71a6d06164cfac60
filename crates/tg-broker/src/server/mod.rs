//! TCP servers for the broker daemon

mod admin;
mod channel;

pub use admin::AdminServer;
pub use channel::ChannelServer;
