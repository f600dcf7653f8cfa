use std::{default::Default, time::Duration};

use crate::{
    constants::{
        DEFAULT_MTU, IPV4_HEADER_SIZE, PROTOCOL_ETHERNET, PROTOCOL_IPV4, TCP_HEADER_SIZE,
        UDP_HEADER_SIZE,
    },
    error::{ErrorKind, Result},
};

/// Multiplexing flavor selecting the wire sub-protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// Full separator format with optional per-packet protocol fields.
    Normal,
    /// Low-latency mode with the simplified one-byte protocol field.
    /// Required when the outer transport is TCP.
    Fast,
    /// Reliable mode: outgoing bundles are retransmitted until acknowledged
    /// over the feedback channel.
    Blast,
}

/// Outer transport mode. Socket setup belongs to the transport collaborator;
/// the engine only needs each mode's header overhead to budget bundle size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    /// Raw IP: bundles ride directly in IP packets.
    Network,
    /// UDP datagrams.
    Udp,
    /// TCP, connecting side.
    TcpClient,
    /// TCP, listening side.
    TcpServer,
}

impl TransportMode {
    /// Returns the per-bundle header overhead this mode adds on the wire.
    pub fn header_overhead(self) -> usize {
        match self {
            TransportMode::Network => IPV4_HEADER_SIZE,
            TransportMode::Udp => IPV4_HEADER_SIZE + UDP_HEADER_SIZE,
            TransportMode::TcpClient | TransportMode::TcpServer => {
                IPV4_HEADER_SIZE + TCP_HEADER_SIZE
            }
        }
    }
}

/// Width of the protocol field on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolFieldWidth {
    /// Single byte; protocol ids above 255 cannot be carried.
    One,
    /// Two bytes, big-endian.
    Two,
}

impl ProtocolFieldWidth {
    /// Returns the number of bytes the field occupies.
    pub fn byte_len(self) -> usize {
        match self {
            ProtocolFieldWidth::One => 1,
            ProtocolFieldWidth::Two => 2,
        }
    }
}

/// Placement of the protocol field relative to its separator. Both sides of
/// a link must agree; encode and decode are symmetric for either choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolPosition {
    /// Separator first, protocol field after it.
    AfterSeparator,
    /// Protocol field first, separator after it.
    BeforeSeparator,
}

/// What the tunnel device delivers as a native packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelFraming {
    /// IP packets (tun-style device).
    Ip,
    /// Ethernet frames (tap-style device).
    Ethernet,
}

impl TunnelFraming {
    /// Returns the native protocol identifier for uncompressed packets.
    pub fn native_protocol(self) -> u16 {
        match self {
            TunnelFraming::Ip => PROTOCOL_IPV4,
            TunnelFraming::Ethernet => PROTOCOL_ETHERNET,
        }
    }
}

#[derive(Clone, Debug)]
/// Configuration options to tune the multiplexing engine.
pub struct MuxConfig {
    /// Multiplexing flavor.
    pub flavor: Flavor,
    /// Outer transport mode; contributes only its header overhead.
    pub transport_mode: TransportMode,
    /// Native framing delivered by the tunnel device.
    pub tunnel_framing: TunnelFraming,
    /// Flush once this many packets have accumulated. None leaves the
    /// trigger policy's default in effect (flush every packet unless
    /// another limit is configured).
    pub packet_count_limit: Option<usize>,
    /// Flush once the accumulated bundle size exceeds this many bytes.
    pub size_threshold: Option<usize>,
    /// Flush once this long has passed since the last flush. Ineffective
    /// when shorter than `period`, since the period always fires first.
    pub timeout: Option<Duration>,
    /// Polling period: the bundle is flushed on every period expiry
    /// regardless of its fill level.
    pub period: Option<Duration>,
    /// Path MTU of the outer link.
    pub mtu: usize,
    /// Width of the protocol field on the wire.
    pub protocol_field_width: ProtocolFieldWidth,
    /// Placement of the protocol field relative to the separator.
    pub protocol_position: ProtocolPosition,
    /// Blast: age after which an unconfirmed packet is retransmitted.
    /// Doubles as the heartbeat cadence.
    pub blast_retry_interval: Duration,
    /// Blast: retransmissions allowed before a packet is reported lost.
    pub blast_retry_ceiling: u32,
    /// Max receive buffer size in bytes for incoming bundles.
    pub receive_buffer_max_size: usize,
}

impl MuxConfig {
    /// Returns the bundle size budget: path MTU minus the active transport
    /// mode's header overhead.
    pub fn size_max(&self) -> usize {
        self.mtu.saturating_sub(self.transport_mode.header_overhead())
    }

    /// Returns the native protocol id for uncompressed packets.
    pub fn native_protocol(&self) -> u16 {
        self.tunnel_framing.native_protocol()
    }

    /// Checks internal consistency. The fast flavor mandates the simplified
    /// one-byte protocol field, and the size budget must leave room for at
    /// least one separator and one payload byte.
    pub fn validate(&self) -> Result<()> {
        if self.flavor == Flavor::Fast && self.protocol_field_width != ProtocolFieldWidth::One {
            return Err(ErrorKind::InvalidConfig(
                "fast flavor requires the one-byte protocol field",
            ));
        }
        if self.size_max() < 4 {
            return Err(ErrorKind::InvalidConfig(
                "mtu leaves no room for a bundle after transport headers",
            ));
        }
        Ok(())
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            flavor: Flavor::Normal,
            transport_mode: TransportMode::Udp,
            tunnel_framing: TunnelFraming::Ip,
            packet_count_limit: None, // Flush every packet unless a limit is set
            size_threshold: None,
            timeout: None,
            period: None,
            mtu: DEFAULT_MTU,
            protocol_field_width: ProtocolFieldWidth::One,
            protocol_position: ProtocolPosition::AfterSeparator,
            blast_retry_interval: Duration::from_millis(200),
            blast_retry_ceiling: 8,
            receive_buffer_max_size: DEFAULT_MTU,
        }
    }
}
