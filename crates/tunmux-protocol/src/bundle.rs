//! Bundle assembly.
//!
//! `BundleBuilder` accumulates encoded packets into one outer buffer,
//! tracking the flush-time size against the path MTU budget and deciding
//! the single-protocol optimization lazily when the bundle is flushed.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use tunmux_core::{
    config::{ProtocolFieldWidth, ProtocolPosition},
    error::Result,
};

use crate::separator;

/// Outcome of a successful append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Appended {
    /// Number of packets now stored in the bundle.
    pub packet_count: usize,
    /// Flush-time size of the bundle including this packet.
    pub projected_size: usize,
}

/// Control signal: the packet does not fit the current bundle. The caller
/// flushes first and retries against the then-empty bundle. Not an error.
/// A payload beyond the separator's length capacity can never fit and is
/// refused even by an empty bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WouldOverflow {
    /// Size the bundle would have reached with the packet included.
    pub projected: usize,
    /// The configured size budget.
    pub size_max: usize,
}

#[derive(Clone, Debug)]
struct StoredPacket {
    protocol: u16,
    payload: Vec<u8>,
}

/// Ordered sequence of sub-packets awaiting flush. Owned exclusively by the
/// `BundleBuilder` between creation and flush; grows as needed, with the
/// size budget enforced by `try_append` rather than a fixed packet ceiling.
#[derive(Clone, Debug, Default)]
pub struct Bundle {
    packets: Vec<StoredPacket>,
}

impl Bundle {
    /// Returns the number of stored packets.
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Returns true when no packets are stored.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// True when every stored packet carries the same protocol id. An empty
    /// or single-packet bundle counts as single-protocol.
    fn is_single_protocol(&self) -> bool {
        self.packets
            .windows(2)
            .all(|pair| pair[0].protocol == pair[1].protocol)
    }
}

/// Accumulates packets into one outer buffer within the size budget.
#[derive(Debug)]
pub struct BundleBuilder {
    bundle: Bundle,
    size_max: usize,
    width: ProtocolFieldWidth,
    position: ProtocolPosition,
}

impl BundleBuilder {
    /// Creates a builder with the given size budget (path MTU minus the
    /// transport mode's header overhead) and protocol-field policy.
    pub fn new(size_max: usize, width: ProtocolFieldWidth, position: ProtocolPosition) -> Self {
        Self { bundle: Bundle::default(), size_max, width, position }
    }

    /// Returns the configured size budget.
    pub fn size_max(&self) -> usize {
        self.size_max
    }

    /// Returns the number of packets in the in-progress bundle.
    pub fn packet_count(&self) -> usize {
        self.bundle.packet_count()
    }

    /// Returns true when the in-progress bundle is empty.
    pub fn is_empty(&self) -> bool {
        self.bundle.is_empty()
    }

    /// Returns the flush-time size of the in-progress bundle.
    pub fn accumulated_size(&self) -> usize {
        self.projected_size(None)
    }

    /// Tries to add a packet to the bundle.
    ///
    /// The size check is computed as if the packet were added, including the
    /// protocol-field bytes the flush will need: one field if the bundle
    /// stays single-protocol, one per packet otherwise. On `WouldOverflow`
    /// no state is mutated.
    ///
    /// Appending to an empty bundle succeeds regardless of the size budget,
    /// so a flush-then-retry cycle terminates; a lone packet beyond the
    /// budget is flushed as an oversize bundle and left to downstream IP
    /// fragmentation. The one exception is a payload beyond the separator's
    /// length capacity at its wire position, which is refused outright
    /// because no flush could ever emit it.
    pub fn try_append(
        &mut self,
        protocol: u16,
        payload: &[u8],
    ) -> std::result::Result<Appended, WouldOverflow> {
        let projected = self.projected_size(Some((protocol, payload.len())));
        if separator::encoded_len(payload.len(), self.bundle.is_empty()).is_err() {
            return Err(WouldOverflow { projected, size_max: self.size_max });
        }
        if !self.bundle.is_empty() && projected > self.size_max {
            return Err(WouldOverflow { projected, size_max: self.size_max });
        }
        self.bundle.packets.push(StoredPacket { protocol, payload: payload.to_vec() });
        Ok(Appended { packet_count: self.bundle.packet_count(), projected_size: projected })
    }

    /// Finalizes and returns the bundle bytes, resetting to empty.
    ///
    /// The SPB bit is computed here from whether all stored protocol ids are
    /// equal; protocol fields are emitted per the placement policy, and
    /// separators and payloads follow arrival order. Flushing an empty
    /// bundle is a no-op returning zero bytes.
    pub fn flush(&mut self) -> Result<Vec<u8>> {
        if self.bundle.is_empty() {
            return Ok(Vec::new());
        }

        let single_protocol = self.bundle.is_single_protocol();
        let mut out = Vec::with_capacity(self.accumulated_size());
        let packets = std::mem::take(&mut self.bundle.packets);

        for (index, packet) in packets.iter().enumerate() {
            let is_first = index == 0;
            let sep = separator::encode(packet.payload.len(), is_first, single_protocol)?;
            let needs_protocol = is_first || !single_protocol;
            match self.position {
                ProtocolPosition::BeforeSeparator => {
                    if needs_protocol {
                        self.write_protocol(&mut out, packet.protocol)?;
                    }
                    out.extend_from_slice(sep.as_slice());
                }
                ProtocolPosition::AfterSeparator => {
                    out.extend_from_slice(sep.as_slice());
                    if needs_protocol {
                        self.write_protocol(&mut out, packet.protocol)?;
                    }
                }
            }
            out.write_all(&packet.payload).map_err(tunmux_core::error::ErrorKind::from)?;
        }

        Ok(out)
    }

    fn write_protocol(&self, out: &mut Vec<u8>, protocol: u16) -> Result<()> {
        match self.width {
            ProtocolFieldWidth::One => {
                // Session-level width guard keeps ids within one byte.
                debug_assert!(protocol <= u8::MAX as u16);
                out.write_u8(protocol as u8)?;
            }
            ProtocolFieldWidth::Two => {
                out.write_u16::<BigEndian>(protocol)?;
            }
        }
        Ok(())
    }

    /// Flush-time size with an optional extra packet included.
    fn projected_size(&self, extra: Option<(u16, usize)>) -> usize {
        let mut lengths: Vec<usize> =
            self.bundle.packets.iter().map(|p| p.payload.len()).collect();
        let mut single_protocol = self.bundle.is_single_protocol();
        if let Some((protocol, length)) = extra {
            if let Some(last) = self.bundle.packets.last() {
                single_protocol = single_protocol && last.protocol == protocol;
            }
            lengths.push(length);
        }
        if lengths.is_empty() {
            return 0;
        }

        let field_count = if single_protocol { 1 } else { lengths.len() };
        let mut size = self.width.byte_len() * field_count;
        for (index, &length) in lengths.iter().enumerate() {
            size += separator_len(length, index == 0) + length;
        }
        size
    }
}

/// Separator byte count for size prediction; saturates at the three-byte
/// form so projecting the size of a refused over-capacity payload is safe.
fn separator_len(length: usize, is_first: bool) -> usize {
    separator::encoded_len(length, is_first).unwrap_or(3)
}
