//! Application Services
//!
//! Services that orchestrate the session and coordinate between ports.
//!
//! - `EventRouter`: Drains session queues into an event sink
//! - `SessionLauncher`: Runs the login handshake and starts session workers

mod launcher;
mod router;

pub use launcher::{LaunchError, SessionLauncher};
pub use router::{EventRouter, RouterExit};
