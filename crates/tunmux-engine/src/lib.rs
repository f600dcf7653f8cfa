#![warn(missing_docs)]

//! tunmux-engine: session composition and the poll-driven driver loop.

/// Driver loop wiring a session to its transport and tunnel collaborators.
pub mod driver;
/// Events emitted by the driver loop.
pub mod event_types;
/// Per-link multiplexing session.
pub mod session;

pub use driver::{Clock, MuxDriver, SystemClock};
pub use event_types::MuxEvent;
pub use session::{IncomingBundle, MuxSession, OutgoingBundle, SessionOutput};
