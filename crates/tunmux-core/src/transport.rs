//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Outer transport abstraction carrying whole bundles.
///
/// This trait allows the concrete transports (raw IP, UDP, TCP client or
/// server, in-memory test doubles) to be plugged into the engine without
/// coupling to socket setup, which is the collaborator's responsibility.
pub trait Transport {
    /// Sends a single bundle to the remote endpoint.
    fn send_bundle(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single bundle into the provided buffer.
    ///
    /// Non-blocking transports return `ErrorKind::WouldBlock` when nothing
    /// is pending.
    fn receive_bundle<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Polls the feedback channel for an acknowledgment sequence id.
    ///
    /// Only meaningful for the blast flavor; the default implementation
    /// reports an idle channel.
    fn poll_feedback(&mut self) -> Result<Option<u16>> {
        Ok(None)
    }

    /// Sends an acknowledgment sequence id over the feedback channel.
    ///
    /// Only meaningful for the blast flavor; the default implementation
    /// discards the acknowledgment.
    fn send_feedback(&mut self, _addr: &SocketAddr, _sequence: u16) -> Result<()> {
        Ok(())
    }

    /// Returns the local address this transport was created from.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether the transport operates in blocking mode.
    fn is_blocking_mode(&self) -> bool;
}
