//! Blast-flavor reliability engine.
//!
//! Tracks unacknowledged outgoing bundles and retransmits them on a
//! heartbeat cadence until the feedback channel confirms them or the retry
//! ceiling declares them lost.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tunmux_core::error::{ErrorKind, Result};

/// 16-bit wrapping sequence number used by the blast sub-protocol.
pub type SequenceNumber = u16;

/// A sent bundle awaiting acknowledgment.
#[derive(Clone, Debug)]
pub struct UnconfirmedPacket {
    /// Sequence id assigned at send time.
    pub sequence: SequenceNumber,
    /// When the bundle was last (re)transmitted.
    pub sent_time: Instant,
    /// Raw bundle bytes for retransmission.
    pub payload: Box<[u8]>,
    /// Retransmissions performed so far.
    pub retries: u32,
}

/// A bundle due for retransmission.
#[derive(Clone, Debug)]
pub struct Retransmit {
    /// Sequence id of the bundle.
    pub sequence: SequenceNumber,
    /// Raw bundle bytes.
    pub payload: Box<[u8]>,
}

/// Outcome of one reliability poll.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Bundles to put back on the wire, oldest first.
    pub retransmits: Vec<Retransmit>,
    /// Sequence ids that exhausted the retry ceiling and are reported lost.
    pub lost: Vec<SequenceNumber>,
}

/// Tracks unacknowledged outgoing bundles for the blast flavor.
#[derive(Debug)]
pub struct ReliabilityEngine {
    next_sequence: SequenceNumber,
    unconfirmed: HashMap<SequenceNumber, UnconfirmedPacket>,
    retry_interval: Duration,
    retry_ceiling: u32,
}

impl ReliabilityEngine {
    /// Creates an engine with the given retry cadence and ceiling. The
    /// retry interval doubles as the heartbeat cadence: an idle link with
    /// unconfirmed bundles keeps retransmitting at this interval.
    pub fn new(retry_interval: Duration, retry_ceiling: u32) -> Self {
        Self {
            next_sequence: 0,
            unconfirmed: HashMap::new(),
            retry_interval,
            retry_ceiling,
        }
    }

    /// Returns the number of bundles awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.unconfirmed.len()
    }

    /// Records a bundle at send time and assigns its sequence id.
    ///
    /// A sequence id that wraps into a still-unconfirmed older entry is a
    /// protocol error (`SequenceReuse`): the retry ceiling is too large
    /// relative to the wrap period. The id is consumed either way.
    pub fn record_send(&mut self, payload: &[u8], now: Instant) -> Result<SequenceNumber> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        if self.unconfirmed.contains_key(&sequence) {
            return Err(ErrorKind::SequenceReuse(sequence));
        }
        self.unconfirmed.insert(sequence, UnconfirmedPacket {
            sequence,
            sent_time: now,
            payload: Box::from(payload),
            retries: 0,
        });
        Ok(sequence)
    }

    /// Removes an entry confirmed over the feedback channel. Returns false
    /// for unknown or already-confirmed ids (late duplicate acks).
    pub fn acknowledge(&mut self, sequence: SequenceNumber) -> bool {
        self.unconfirmed.remove(&sequence).is_some()
    }

    /// Finds a sequence id with no unconfirmed entry, for stamping a bundle
    /// that goes out untracked after a wrap collision. An id with a live
    /// entry must never reach the wire twice, since the receiver's ack for
    /// the untracked copy would cancel retransmission of the tracked one.
    /// None when the entire id space is in flight.
    pub fn vacant_sequence(&self) -> Option<SequenceNumber> {
        let mut candidate = self.next_sequence;
        for _ in 0..=u16::MAX as u32 {
            if !self.unconfirmed.contains_key(&candidate) {
                return Some(candidate);
            }
            candidate = candidate.wrapping_add(1);
        }
        None
    }

    /// Heartbeat pass: retransmits every entry older than the retry
    /// interval and reports entries that exhausted the ceiling as lost.
    pub fn poll(&mut self, now: Instant) -> PollOutcome {
        let mut due: Vec<SequenceNumber> = self
            .unconfirmed
            .iter()
            .filter(|(_, entry)| {
                now.saturating_duration_since(entry.sent_time) > self.retry_interval
            })
            .map(|(&sequence, _)| sequence)
            .collect();
        // Oldest first in wrap-aware send order.
        due.sort_unstable_by(|&a, &b| {
            if sequence_less_than(a, b) {
                std::cmp::Ordering::Less
            } else if a == b {
                std::cmp::Ordering::Equal
            } else {
                std::cmp::Ordering::Greater
            }
        });

        let mut outcome = PollOutcome::default();
        for sequence in due {
            let exhausted = self
                .unconfirmed
                .get(&sequence)
                .map(|entry| entry.retries >= self.retry_ceiling)
                .unwrap_or(false);
            if exhausted {
                self.unconfirmed.remove(&sequence);
                tracing::warn!(
                    "bundle seq {} lost after {} retransmissions",
                    sequence,
                    self.retry_ceiling
                );
                outcome.lost.push(sequence);
            } else if let Some(entry) = self.unconfirmed.get_mut(&sequence) {
                entry.retries += 1;
                entry.sent_time = now;
                outcome
                    .retransmits
                    .push(Retransmit { sequence, payload: entry.payload.clone() });
            }
        }
        outcome
    }

    /// Earliest instant at which some entry becomes due, for the scheduling
    /// tick of the surrounding loop.
    pub fn next_retry_deadline(&self) -> Option<Instant> {
        self.unconfirmed
            .values()
            .map(|entry| entry.sent_time + self.retry_interval)
            .min()
    }
}

/// Compares sequence numbers with wrapping arithmetic.
fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

/// Compares sequence numbers with wrapping arithmetic.
fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}
