//! Demultiplexing parser.
//!
//! Walks an incoming bundle buffer and recovers each constituent packet and
//! its native protocol id, reversing `BundleBuilder`. The parser is a lazy,
//! finite, non-restartable iterator; a fault anywhere poisons the rest of
//! the bundle, and `collect_packets` enforces the all-or-nothing contract.

use byteorder::{BigEndian, ReadBytesExt};
use tunmux_core::{
    config::{ProtocolFieldWidth, ProtocolPosition},
    error::{DecodingErrorKind, ErrorKind, Result},
};

use crate::separator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DemuxState {
    ReadFirstSeparator,
    ReadProtocol,
    ReadPayload,
    ReadNonFirstSeparator,
}

/// Iterator over the sub-packets of one bundle.
///
/// The SPB bit read from the first separator fixes protocol-field presence
/// for the remainder of the bundle. The sequence must be fully consumed
/// before the backing buffer is released.
#[derive(Debug)]
pub struct Demultiplexer<'a> {
    buffer: &'a [u8],
    pos: usize,
    width: ProtocolFieldWidth,
    position: ProtocolPosition,
    state: DemuxState,
    single_protocol: bool,
    bundle_protocol: u16,
    pending_length: usize,
    pending_protocol: Option<u16>,
    first_done: bool,
    failed: bool,
}

impl<'a> Demultiplexer<'a> {
    /// Creates a parser over one incoming bundle.
    pub fn new(buffer: &'a [u8], width: ProtocolFieldWidth, position: ProtocolPosition) -> Self {
        let state = match position {
            ProtocolPosition::BeforeSeparator => DemuxState::ReadProtocol,
            ProtocolPosition::AfterSeparator => DemuxState::ReadFirstSeparator,
        };
        Self {
            buffer,
            pos: 0,
            width,
            position,
            state,
            single_protocol: false,
            bundle_protocol: 0,
            pending_length: 0,
            pending_protocol: None,
            first_done: false,
            failed: false,
        }
    }

    /// Consumes the parser, returning either every sub-packet or the first
    /// fault. No partial packet list is ever delivered.
    pub fn collect_packets(mut self) -> Result<Vec<(u16, &'a [u8])>> {
        let mut packets = Vec::new();
        while let Some(item) = self.next() {
            packets.push(item?);
        }
        Ok(packets)
    }

    fn read_protocol(&mut self) -> Result<u16> {
        match self.width {
            ProtocolFieldWidth::One => {
                let byte = *self
                    .buffer
                    .get(self.pos)
                    .ok_or(ErrorKind::Truncated(DecodingErrorKind::ProtocolField))?;
                self.pos += 1;
                Ok(byte as u16)
            }
            ProtocolFieldWidth::Two => {
                let mut rest = &self.buffer[self.pos.min(self.buffer.len())..];
                let value = rest
                    .read_u16::<BigEndian>()
                    .map_err(|_| ErrorKind::Truncated(DecodingErrorKind::ProtocolField))?;
                self.pos += 2;
                Ok(value)
            }
        }
    }

    fn parse_next(&mut self) -> Result<(u16, &'a [u8])> {
        loop {
            match self.state {
                DemuxState::ReadProtocol => {
                    let protocol = self.read_protocol()?;
                    self.pending_protocol = Some(protocol);
                    self.state = match (self.position, self.first_done) {
                        (ProtocolPosition::BeforeSeparator, false) => {
                            DemuxState::ReadFirstSeparator
                        }
                        (ProtocolPosition::BeforeSeparator, true) => {
                            DemuxState::ReadNonFirstSeparator
                        }
                        (ProtocolPosition::AfterSeparator, _) => DemuxState::ReadPayload,
                    };
                }
                DemuxState::ReadFirstSeparator => {
                    let sep = separator::decode(&self.buffer[self.pos..], true)?;
                    self.single_protocol = sep.single_protocol;
                    self.pending_length = sep.length;
                    self.pos += sep.consumed;
                    self.state = match self.position {
                        ProtocolPosition::AfterSeparator => DemuxState::ReadProtocol,
                        ProtocolPosition::BeforeSeparator => DemuxState::ReadPayload,
                    };
                }
                DemuxState::ReadNonFirstSeparator => {
                    let sep = separator::decode(&self.buffer[self.pos..], false)?;
                    self.pending_length = sep.length;
                    self.pos += sep.consumed;
                    self.state = if self.position == ProtocolPosition::AfterSeparator
                        && !self.single_protocol
                    {
                        DemuxState::ReadProtocol
                    } else {
                        DemuxState::ReadPayload
                    };
                }
                DemuxState::ReadPayload => {
                    let length = self.pending_length;
                    if self.pos + length > self.buffer.len() {
                        return Err(ErrorKind::Truncated(DecodingErrorKind::Payload));
                    }
                    let payload = &self.buffer[self.pos..self.pos + length];
                    self.pos += length;

                    let protocol = match self.pending_protocol.take() {
                        Some(protocol) => {
                            self.bundle_protocol = protocol;
                            protocol
                        }
                        // Single-protocol bundle: later packets reuse the
                        // id carried by the first one.
                        None => self.bundle_protocol,
                    };

                    self.first_done = true;
                    self.state = match (self.position, self.single_protocol) {
                        (ProtocolPosition::BeforeSeparator, false) => DemuxState::ReadProtocol,
                        _ => DemuxState::ReadNonFirstSeparator,
                    };
                    return Ok((protocol, payload));
                }
            }
        }
    }
}

impl<'a> Iterator for Demultiplexer<'a> {
    type Item = Result<(u16, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos == self.buffer.len() {
            return None;
        }
        match self.parse_next() {
            Ok(item) => Some(Ok(item)),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleBuilder;
    use tunmux_core::constants::{PROTOCOL_ETHERNET, PROTOCOL_IPV4, PROTOCOL_ROHC};

    fn build(
        width: ProtocolFieldWidth,
        position: ProtocolPosition,
        packets: &[(u16, &[u8])],
    ) -> Vec<u8> {
        let mut builder = BundleBuilder::new(100_000, width, position);
        for &(protocol, payload) in packets {
            builder.try_append(protocol, payload).unwrap();
        }
        builder.flush().unwrap()
    }

    fn demux_all(
        bytes: &[u8],
        width: ProtocolFieldWidth,
        position: ProtocolPosition,
    ) -> Result<Vec<(u16, Vec<u8>)>> {
        Demultiplexer::new(bytes, width, position)
            .collect_packets()
            .map(|packets| {
                packets.into_iter().map(|(p, b)| (p, b.to_vec())).collect()
            })
    }

    #[test]
    fn test_roundtrip_single_protocol() {
        let packets: Vec<(u16, &[u8])> =
            vec![(PROTOCOL_IPV4, b"alpha"), (PROTOCOL_IPV4, b"beta"), (PROTOCOL_IPV4, b"gamma")];
        for position in [ProtocolPosition::AfterSeparator, ProtocolPosition::BeforeSeparator] {
            let bytes = build(ProtocolFieldWidth::One, position, &packets);
            let out = demux_all(&bytes, ProtocolFieldWidth::One, position).unwrap();
            assert_eq!(out.len(), 3);
            for (expected, actual) in packets.iter().zip(out.iter()) {
                assert_eq!(actual.0, expected.0);
                assert_eq!(actual.1, expected.1);
            }
        }
    }

    #[test]
    fn test_roundtrip_mixed_protocols() {
        let packets: Vec<(u16, &[u8])> = vec![
            (PROTOCOL_IPV4, b"one".as_slice()),
            (PROTOCOL_ROHC, b"two".as_slice()),
            (PROTOCOL_ETHERNET, b"three".as_slice()),
        ];
        for width in [ProtocolFieldWidth::One, ProtocolFieldWidth::Two] {
            for position in [ProtocolPosition::AfterSeparator, ProtocolPosition::BeforeSeparator] {
                let bytes = build(width, position, &packets);
                let out = demux_all(&bytes, width, position).unwrap();
                assert_eq!(out.len(), 3);
                for (expected, actual) in packets.iter().zip(out.iter()) {
                    assert_eq!(actual.0, expected.0);
                    assert_eq!(actual.1, expected.1);
                }
            }
        }
    }

    #[test]
    fn test_roundtrip_large_payloads_cross_separator_forms() {
        let big = vec![0x5a; 9000];
        let bigger = vec![0xa5; 20_000];
        let packets: Vec<(u16, &[u8])> =
            vec![(PROTOCOL_IPV4, &big), (PROTOCOL_IPV4, &bigger), (PROTOCOL_IPV4, b"tail")];
        let bytes = build(ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator, &packets);
        let out =
            demux_all(&bytes, ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator).unwrap();
        assert_eq!(out[0].1.len(), 9000);
        assert_eq!(out[1].1.len(), 20_000);
        assert_eq!(out[2].1, b"tail");
    }

    #[test]
    fn test_truncated_last_payload_rejects_whole_bundle() {
        let packets: Vec<(u16, &[u8])> =
            vec![(PROTOCOL_IPV4, b"first"), (PROTOCOL_IPV4, b"second")];
        let bytes = build(ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator, &packets);
        let truncated = &bytes[..bytes.len() - 1];

        let result =
            Demultiplexer::new(truncated, ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator)
                .collect_packets();
        assert!(matches!(result, Err(ErrorKind::Truncated(DecodingErrorKind::Payload))));
    }

    #[test]
    fn test_iterator_poisons_after_fault() {
        let packets: Vec<(u16, &[u8])> =
            vec![(PROTOCOL_IPV4, b"first"), (PROTOCOL_IPV4, b"second")];
        let bytes = build(ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator, &packets);
        let truncated = &bytes[..bytes.len() - 1];

        let mut demux =
            Demultiplexer::new(truncated, ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator);
        // First packet parses fine.
        assert!(demux.next().unwrap().is_ok());
        // Second one faults, and the iterator is spent.
        assert!(demux.next().unwrap().is_err());
        assert!(demux.next().is_none());
    }

    #[test]
    fn test_truncated_protocol_field() {
        // A first separator announcing a 2-byte protocol field that is cut off.
        let bytes = build(
            ProtocolFieldWidth::Two,
            ProtocolPosition::AfterSeparator,
            &[(PROTOCOL_IPV4, b"x")],
        );
        let result = Demultiplexer::new(
            &bytes[..2],
            ProtocolFieldWidth::Two,
            ProtocolPosition::AfterSeparator,
        )
        .collect_packets();
        assert!(matches!(result, Err(ErrorKind::Truncated(DecodingErrorKind::ProtocolField))));
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let out = demux_all(&[], ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_zero_length_payloads() {
        let packets: Vec<(u16, &[u8])> =
            vec![(PROTOCOL_IPV4, b""), (PROTOCOL_IPV4, b"mid"), (PROTOCOL_IPV4, b"")];
        let bytes = build(ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator, &packets);
        let out =
            demux_all(&bytes, ProtocolFieldWidth::One, ProtocolPosition::AfterSeparator).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out[0].1.is_empty());
        assert_eq!(out[1].1, b"mid");
        assert!(out[2].1.is_empty());
    }
}
