#![warn(missing_docs)]

//! tunmux-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core types shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Collaborator contracts (transport socket, tunnel device)
//!
//! Protocol-specific logic lives in specialized crates:
//! - `tunmux-protocol`: separator codec, bundle builder, trigger policy,
//!   demultiplexer, compression adapter, blast reliability engine
//! - `tunmux-engine`: session composition and the poll-driven event loop

/// Protocol constants shared across layers.
pub mod constants {
    /// Native protocol identifier for an IP packet carried in the tunnel.
    pub const PROTOCOL_IPV4: u16 = 4;
    /// Native protocol identifier for a compressed-header sub-packet,
    /// as produced by the header-compression collaborator.
    pub const PROTOCOL_ROHC: u16 = 142;
    /// Native protocol identifier for an Ethernet frame carried in the tunnel.
    pub const PROTOCOL_ETHERNET: u16 = 143;

    /// Default path MTU assumed for the outer transport link.
    pub const DEFAULT_MTU: usize = 1500;

    /// Packet-count ceiling applied when the operator configures any other
    /// trigger limit. Raising the default (1) to this constant lets the
    /// configured size/timeout/period condition govern flushing instead.
    pub const RAISED_PACKET_COUNT_LIMIT: usize = 1 << 16;

    /// IPv4 header size in bytes, without options.
    pub const IPV4_HEADER_SIZE: usize = 20;
    /// UDP header size in bytes.
    pub const UDP_HEADER_SIZE: usize = 8;
    /// TCP header size in bytes, without options.
    pub const TCP_HEADER_SIZE: usize = 20;
}

/// Configuration options for the multiplexing engine.
pub mod config;
/// Error types and results.
pub mod error;
/// Transport abstraction for pluggable I/O.
pub mod transport;
/// Tunnel device contract for native packet I/O.
pub mod tunnel;
