//! Host-side driver for Qontrol modules on a serial line.

pub mod port;
pub mod proto;
pub mod session;
pub mod sim;
pub mod stats;
pub mod transport;

pub use session::{SendOptions, Session, SessionConfig, SessionError};
pub use transport::Transport;
