//! Chrome DevTools Protocol client
//!
//! A WebSocket transport plus typed wrappers for the handful of commands the
//! page driver uses.

pub mod connection;
pub mod transport;
pub mod types;

pub use connection::{Connection, Session};
pub use transport::Transport;
pub use types::{MouseButton, MouseEventType};
