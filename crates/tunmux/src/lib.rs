#![warn(missing_docs)]

//! Tunmux: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types for multiplexing tunnel packets over one outer
//! transport:
//!
//! - Session and driver (`MuxSession`, `MuxDriver`, `MuxEvent`)
//! - Configuration (`MuxConfig`, `Flavor`, `TransportMode`)
//! - Collaborator seams (`Transport`, `TunnelDevice`, `HeaderCompressor`)
//!
//! Example
//! ```ignore
//! use std::time::Instant;
//! use tunmux::{MuxConfig, MuxSession, DeflateCompressor};
//!
//! let now = Instant::now();
//! let mut session =
//!     MuxSession::<DeflateCompressor>::new(MuxConfig::default(), None, now).unwrap();
//!
//! // One native packet in, one bundle out (default config is unbuffered).
//! let output = session.offer_packet(b"native packet", now).unwrap();
//! assert_eq!(output.bundles.len(), 1);
//!
//! let incoming = session.handle_bundle(&output.bundles[0].payload).unwrap();
//! assert_eq!(incoming.packets[0], b"native packet");
//! ```

// Core configuration and collaborator seams
pub use tunmux_core::{
    config::{
        Flavor, MuxConfig, ProtocolFieldWidth, ProtocolPosition, TransportMode, TunnelFraming,
    },
    error::{DecodingErrorKind, ErrorKind, Result},
    transport::Transport,
    tunnel::TunnelDevice,
};
// Engine: session state machine and driver loop
pub use tunmux_engine::{
    IncomingBundle, MuxDriver, MuxEvent, MuxSession, OutgoingBundle, SessionOutput,
};
// Protocol: compression seam and blast sequence ids
pub use tunmux_protocol::{
    compression::{DeflateCompressor, HeaderCompressor},
    SequenceNumber,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        DeflateCompressor, Flavor, HeaderCompressor, MuxConfig, MuxDriver, MuxEvent, MuxSession,
        ProtocolFieldWidth, ProtocolPosition, Transport, TransportMode, TunnelDevice,
        TunnelFraming,
    };
}
