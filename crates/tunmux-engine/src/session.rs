//! Per-link multiplexing session.
//!
//! `MuxSession` composes the protocol pieces for one tunnel endpoint: the
//! compression adapter, the bundle builder with its trigger policy, and the
//! blast reliability engine when that flavor is active. It is pure state
//! machine; all I/O stays with the driver.

use std::time::{Duration, Instant};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tunmux_core::{
    config::{Flavor, MuxConfig, ProtocolFieldWidth},
    error::{DecodingErrorKind, ErrorKind, Result},
};
use tunmux_protocol::{
    blast::ReliabilityEngine,
    bundle::BundleBuilder,
    compression::{CompressionAdapter, HeaderCompressor},
    demux::Demultiplexer,
    separator,
    trigger::{TriggerPolicy, TriggerState},
    SequenceNumber,
};

/// Bytes prepended to every blast bundle to carry its sequence id.
pub const BLAST_PREFIX_SIZE: usize = 2;

/// One bundle ready for the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingBundle {
    /// Wire bytes, including the blast sequence prefix when applicable.
    pub payload: Vec<u8>,
    /// Sequence id tracked for retransmission, when tracked.
    pub sequence: Option<SequenceNumber>,
}

/// Everything one session step produced.
#[derive(Debug, Default)]
pub struct SessionOutput {
    /// Bundles to hand to the transport, in order.
    pub bundles: Vec<OutgoingBundle>,
    /// Sequence ids reported lost during this step.
    pub lost: Vec<SequenceNumber>,
    /// Sequence ids that wrapped into unconfirmed entries; their bundles
    /// were sent untracked.
    pub sequence_reuse: Vec<SequenceNumber>,
}

/// Result of demultiplexing one incoming bundle.
#[derive(Debug, Default)]
pub struct IncomingBundle {
    /// Recovered native packets, in wire order.
    pub packets: Vec<Vec<u8>>,
    /// Sequence id to acknowledge over the feedback channel (blast).
    pub ack: Option<SequenceNumber>,
}

/// Multiplexing state machine for one link.
#[derive(Debug)]
pub struct MuxSession<C> {
    config: MuxConfig,
    builder: BundleBuilder,
    policy: TriggerPolicy,
    adapter: CompressionAdapter<C>,
    reliability: Option<ReliabilityEngine>,
    last_flush: Instant,
}

impl<C: HeaderCompressor> MuxSession<C> {
    /// Creates a session from a validated configuration.
    ///
    /// The blast flavor reserves the sequence prefix out of the bundle size
    /// budget so the finished wire packet still fits the path MTU.
    pub fn new(config: MuxConfig, compressor: Option<C>, now: Instant) -> Result<Self> {
        config.validate()?;
        let mut size_max = config.size_max();
        if config.flavor == Flavor::Blast {
            size_max = size_max.saturating_sub(BLAST_PREFIX_SIZE);
        }
        let builder =
            BundleBuilder::new(size_max, config.protocol_field_width, config.protocol_position);
        let policy = TriggerPolicy::from_config(&config);
        let adapter = CompressionAdapter::new(compressor, config.native_protocol());
        let reliability = match config.flavor {
            Flavor::Blast => Some(ReliabilityEngine::new(
                config.blast_retry_interval,
                config.blast_retry_ceiling,
            )),
            Flavor::Normal | Flavor::Fast => None,
        };
        Ok(Self { config, builder, policy, adapter, reliability, last_flush: now })
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Returns the number of blast bundles awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.reliability.as_ref().map(ReliabilityEngine::in_flight).unwrap_or(0)
    }

    /// Offers one native packet from the tunnel device to the multiplexer.
    ///
    /// The packet is compressed, appended to the in-progress bundle, and the
    /// trigger policy is evaluated; any bundle that must go out now is
    /// returned. A packet that overflows the current bundle forces a flush
    /// and is retried against the then-empty bundle, which accepts any
    /// packet that passed the capacity guard.
    pub fn offer_packet(&mut self, packet: &[u8], now: Instant) -> Result<SessionOutput> {
        let mut output = SessionOutput::default();
        let (protocol, bytes) = self.adapter.compress_outgoing(packet);

        if self.config.protocol_field_width == ProtocolFieldWidth::One
            && protocol > u8::MAX as u16
        {
            tracing::warn!(
                "dropping packet: protocol id {} does not fit the one-byte field",
                protocol
            );
            return Ok(output);
        }
        if separator::encoded_len(bytes.len(), true).is_err() {
            tracing::warn!(
                "dropping packet: {} bytes exceeds separator length capacity",
                bytes.len()
            );
            return Ok(output);
        }

        let appended = match self.builder.try_append(protocol, &bytes) {
            Ok(appended) => appended,
            Err(_) => {
                self.flush_into(&mut output, now)?;
                self.builder
                    .try_append(protocol, &bytes)
                    .expect("guarded payload fits an empty bundle")
            }
        };

        let state = TriggerState {
            packet_count: appended.packet_count,
            accumulated_size: appended.projected_size,
            last_flush: self.last_flush,
        };
        if self.policy.should_flush(&state, now).is_some() {
            self.flush_into(&mut output, now)?;
        }
        Ok(output)
    }

    /// Scheduling tick: evaluates the time-driven triggers and runs the
    /// blast heartbeat.
    pub fn on_tick(&mut self, now: Instant) -> Result<SessionOutput> {
        let mut output = SessionOutput::default();

        let state = TriggerState {
            packet_count: self.builder.packet_count(),
            accumulated_size: self.builder.accumulated_size(),
            last_flush: self.last_flush,
        };
        if self.policy.should_flush(&state, now).is_some() {
            self.flush_into(&mut output, now)?;
        } else if self.builder.is_empty() {
            // Restart the time window on an idle link so a stale deadline
            // does not flush the very next packet prematurely.
            if self.policy.next_deadline(self.last_flush).map_or(false, |deadline| deadline <= now)
            {
                self.last_flush = now;
            }
        }

        if let Some(engine) = self.reliability.as_mut() {
            let outcome = engine.poll(now);
            for retransmit in outcome.retransmits {
                output.bundles.push(OutgoingBundle {
                    payload: prefix_sequence(retransmit.sequence, &retransmit.payload)?,
                    sequence: Some(retransmit.sequence),
                });
            }
            output.lost.extend(outcome.lost);
        }
        Ok(output)
    }

    /// Demultiplexes one incoming bundle into native packets.
    ///
    /// In the blast flavor the leading sequence prefix is stripped and
    /// surfaced so the driver can acknowledge it over the feedback channel.
    /// Sub-packets that fail decompression are dropped individually; a
    /// malformed bundle fails whole with zero packets.
    pub fn handle_bundle(&mut self, bundle: &[u8]) -> Result<IncomingBundle> {
        let mut incoming = IncomingBundle::default();
        let mut body = bundle;
        if self.reliability.is_some() {
            if bundle.len() < BLAST_PREFIX_SIZE {
                return Err(ErrorKind::Truncated(DecodingErrorKind::Separator));
            }
            let mut prefix = &bundle[..BLAST_PREFIX_SIZE];
            incoming.ack = Some(prefix.read_u16::<BigEndian>()?);
            body = &bundle[BLAST_PREFIX_SIZE..];
        }

        let packets = Demultiplexer::new(
            body,
            self.config.protocol_field_width,
            self.config.protocol_position,
        )
        .collect_packets()?;
        incoming.packets = packets
            .into_iter()
            .filter_map(|(protocol, payload)| self.adapter.decompress_incoming(protocol, payload))
            .collect();
        Ok(incoming)
    }

    /// Feeds one acknowledgment from the feedback channel into the blast
    /// engine. Returns false for unknown ids or non-blast sessions.
    pub fn handle_ack(&mut self, sequence: SequenceNumber) -> bool {
        match self.reliability.as_mut() {
            Some(engine) => engine.acknowledge(sequence),
            None => false,
        }
    }

    /// How long the surrounding loop may sleep before something becomes due.
    /// None means no time-driven work is pending.
    pub fn next_tick(&self, now: Instant) -> Option<Duration> {
        let mut deadline = if self.builder.is_empty() {
            None
        } else {
            self.policy.next_deadline(self.last_flush)
        };
        if let Some(engine) = self.reliability.as_ref() {
            deadline = match (deadline, engine.next_retry_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        deadline.map(|deadline| deadline.saturating_duration_since(now))
    }

    fn flush_into(&mut self, output: &mut SessionOutput, now: Instant) -> Result<()> {
        let bundle = self.builder.flush()?;
        if bundle.is_empty() {
            return Ok(());
        }
        self.last_flush = now;

        let engine = match self.reliability.as_mut() {
            Some(engine) => engine,
            None => {
                output.bundles.push(OutgoingBundle { payload: bundle, sequence: None });
                return Ok(());
            }
        };
        match engine.record_send(&bundle, now) {
            Ok(sequence) => output.bundles.push(OutgoingBundle {
                payload: prefix_sequence(sequence, &bundle)?,
                sequence: Some(sequence),
            }),
            Err(ErrorKind::SequenceReuse(sequence)) => {
                tracing::warn!(
                    "sequence id {} wrapped into an unconfirmed entry, sending untracked",
                    sequence
                );
                output.sequence_reuse.push(sequence);
                // The untracked bundle must not carry the colliding id: the
                // receiver acknowledges whatever id is on the wire, and that
                // ack would cancel retransmission of the live entry. Stamp a
                // vacant id instead; its ack hits nothing. Only when every
                // id is in flight does the colliding id go out as-is.
                let wire_sequence = engine.vacant_sequence().unwrap_or(sequence);
                output.bundles.push(OutgoingBundle {
                    payload: prefix_sequence(wire_sequence, &bundle)?,
                    sequence: None,
                });
            }
            Err(other) => return Err(other),
        }
        Ok(())
    }
}

/// Prepends the blast sequence id to finished bundle bytes.
fn prefix_sequence(sequence: SequenceNumber, bundle: &[u8]) -> Result<Vec<u8>> {
    let mut wire = Vec::with_capacity(BLAST_PREFIX_SIZE + bundle.len());
    wire.write_u16::<BigEndian>(sequence)?;
    wire.extend_from_slice(bundle);
    Ok(wire)
}
