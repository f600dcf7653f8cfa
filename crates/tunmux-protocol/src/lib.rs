#![warn(missing_docs)]

//! tunmux-protocol: separator wire format and multiplexing logic.

/// Blast-flavor reliability engine.
pub mod blast;
/// Bundle assembly against the path MTU budget.
pub mod bundle;
/// Optional per-packet header compression seam.
pub mod compression;
/// Demultiplexing parser for incoming bundles.
pub mod demux;
/// Separator encoding and decoding.
pub mod separator;
/// Bundle flush trigger policy.
pub mod trigger;

pub use blast::{PollOutcome, ReliabilityEngine, Retransmit, SequenceNumber, UnconfirmedPacket};
pub use bundle::{Appended, Bundle, BundleBuilder, WouldOverflow};
pub use compression::{CompressionAdapter, DeflateCompressor, HeaderCompressor};
pub use demux::Demultiplexer;
pub use separator::SeparatorForm;
pub use trigger::{FlushReason, TriggerPolicy, TriggerState};
