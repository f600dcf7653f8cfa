//! Tunnel device contract for native packet I/O.

use std::io::Result;

/// Contract the engine consumes from the tunnel device collaborator.
///
/// Device creation and platform plumbing are out of scope; the engine only
/// reads native packets destined for multiplexing and writes back the
/// packets it recovers from incoming bundles.
pub trait TunnelDevice {
    /// Reads one native packet into the provided buffer.
    ///
    /// Non-blocking devices return `ErrorKind::WouldBlock` when no packet
    /// is pending.
    fn read_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<&'a [u8]>;

    /// Writes one native packet to the device.
    fn write_packet(&mut self, packet: &[u8]) -> Result<usize>;
}
