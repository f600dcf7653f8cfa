//! Events emitted by the driver loop.
//!
//! The driver pushes these through its event channel so the application can
//! observe link-level conditions without being wired into the poll loop.

use std::net::SocketAddr;

use tunmux_protocol::SequenceNumber;

/// Events that can occur and are pushed through the event receiver.
#[derive(Debug, PartialEq, Eq)]
pub enum MuxEvent {
    /// A blast bundle exhausted its retry ceiling without acknowledgment.
    PacketLost(SequenceNumber),
    /// A blast sequence id wrapped into a still-unconfirmed entry; the
    /// bundle was sent untracked.
    SequenceReuse(SequenceNumber),
    /// An incoming bundle failed to demultiplex and was discarded whole.
    MalformedBundle {
        /// Sender of the rejected bundle.
        from: SocketAddr,
        /// Size of the rejected bundle in bytes.
        size: usize,
    },
}
