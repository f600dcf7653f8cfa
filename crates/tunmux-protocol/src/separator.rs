//! Separator encoding and decoding.
//!
//! Every sub-packet in a bundle is prefixed by a 1-, 2-, or 3-byte
//! separator carrying its payload length. The first separator of a bundle
//! additionally carries the Single-Protocol-Bit (SPB) in bit 7, which costs
//! it one length bit relative to the non-first form. Length bytes chain via
//! the Length-eXTension (LXT) bit; chunks are in big-endian order.

use tunmux_core::error::{DecodingErrorKind, ErrorKind, Result};

/// Single-Protocol-Bit, bit 7 of the first separator.
const SPB_BIT: u8 = 0x80;
/// LXT bit of the first separator (bit 6; bit 7 is the SPB).
const FIRST_LXT_BIT: u8 = 0x40;
/// LXT bit of non-first separators and of all continuation bytes.
const LXT_BIT: u8 = 0x80;

/// Largest payload length the first separator can express (20 length bits).
pub const MAX_FIRST_LENGTH: usize = (1 << 20) - 1;
/// Largest payload length a non-first separator can express (21 length bits).
pub const MAX_NON_FIRST_LENGTH: usize = (1 << 21) - 1;

const FIRST_ONE_BYTE_MAX: usize = (1 << 6) - 1; // 63
const FIRST_TWO_BYTE_MAX: usize = (1 << 13) - 1; // 8191
const NON_FIRST_ONE_BYTE_MAX: usize = (1 << 7) - 1; // 127
const NON_FIRST_TWO_BYTE_MAX: usize = (1 << 14) - 1; // 16383

/// The three encoded shapes a separator can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeparatorForm {
    /// Single byte, no continuation.
    OneByte,
    /// One continuation byte.
    TwoByte,
    /// Two continuation bytes.
    ThreeByte,
}

impl SeparatorForm {
    /// Returns the number of bytes this form occupies on the wire.
    pub fn byte_len(self) -> usize {
        match self {
            SeparatorForm::OneByte => 1,
            SeparatorForm::TwoByte => 2,
            SeparatorForm::ThreeByte => 3,
        }
    }

    /// Chooses the smallest form able to express `length` at the given
    /// position. Fails with `LengthTooLarge` beyond the three-byte capacity.
    pub fn for_length(length: usize, is_first: bool) -> Result<SeparatorForm> {
        let (one_max, two_max, max) = if is_first {
            (FIRST_ONE_BYTE_MAX, FIRST_TWO_BYTE_MAX, MAX_FIRST_LENGTH)
        } else {
            (NON_FIRST_ONE_BYTE_MAX, NON_FIRST_TWO_BYTE_MAX, MAX_NON_FIRST_LENGTH)
        };
        if length <= one_max {
            Ok(SeparatorForm::OneByte)
        } else if length <= two_max {
            Ok(SeparatorForm::TwoByte)
        } else if length <= max {
            Ok(SeparatorForm::ThreeByte)
        } else {
            Err(ErrorKind::LengthTooLarge { length, max })
        }
    }
}

/// An encoded separator: up to three bytes, ready for the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodedSeparator {
    bytes: [u8; 3],
    len: usize,
}

impl EncodedSeparator {
    /// Returns the encoded bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Returns the encoded length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// An encoded separator is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl AsRef<[u8]> for EncodedSeparator {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// A decoded separator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedSeparator {
    /// Payload length announced by the separator.
    pub length: usize,
    /// SPB value; always false for non-first separators.
    pub single_protocol: bool,
    /// Number of separator bytes consumed from the buffer.
    pub consumed: usize,
}

/// Returns the number of bytes `encode` would emit for this length.
pub fn encoded_len(length: usize, is_first: bool) -> Result<usize> {
    SeparatorForm::for_length(length, is_first).map(SeparatorForm::byte_len)
}

/// Encodes a separator for a payload of `length` bytes.
///
/// `single_protocol` only has an effect on the first separator; callers fill
/// it in at flush time once the bundle's protocol mix is known.
pub fn encode(length: usize, is_first: bool, single_protocol: bool) -> Result<EncodedSeparator> {
    let form = SeparatorForm::for_length(length, is_first)?;
    let spb = if is_first && single_protocol { SPB_BIT } else { 0 };
    let mut bytes = [0u8; 3];
    match (is_first, form) {
        (true, SeparatorForm::OneByte) => {
            bytes[0] = spb | length as u8;
        }
        (true, SeparatorForm::TwoByte) => {
            bytes[0] = spb | FIRST_LXT_BIT | (length >> 7) as u8;
            bytes[1] = (length & 0x7f) as u8;
        }
        (true, SeparatorForm::ThreeByte) => {
            bytes[0] = spb | FIRST_LXT_BIT | ((length >> 14) & 0x3f) as u8;
            bytes[1] = LXT_BIT | ((length >> 7) & 0x7f) as u8;
            bytes[2] = (length & 0x7f) as u8;
        }
        (false, SeparatorForm::OneByte) => {
            bytes[0] = length as u8;
        }
        (false, SeparatorForm::TwoByte) => {
            bytes[0] = LXT_BIT | (length >> 7) as u8;
            bytes[1] = (length & 0x7f) as u8;
        }
        (false, SeparatorForm::ThreeByte) => {
            bytes[0] = LXT_BIT | ((length >> 14) & 0x7f) as u8;
            bytes[1] = LXT_BIT | ((length >> 7) & 0x7f) as u8;
            bytes[2] = (length & 0x7f) as u8;
        }
    }
    Ok(EncodedSeparator { bytes, len: form.byte_len() })
}

/// Decodes a separator from the start of `buffer`.
///
/// Reads LXT continuation bytes until a terminal byte, reconstructing the
/// length by shifting each chunk left by seven bits. Fails with `Truncated`
/// if the buffer ends mid-chain, and rejects chains longer than the
/// three-byte form (LXT still set on the third byte).
pub fn decode(buffer: &[u8], is_first: bool) -> Result<DecodedSeparator> {
    let first_byte = *buffer
        .first()
        .ok_or(ErrorKind::Truncated(DecodingErrorKind::Separator))?;

    let (mut length, mut more, single_protocol) = if is_first {
        (
            (first_byte & 0x3f) as usize,
            first_byte & FIRST_LXT_BIT != 0,
            first_byte & SPB_BIT != 0,
        )
    } else {
        ((first_byte & 0x7f) as usize, first_byte & LXT_BIT != 0, false)
    };

    let mut consumed = 1;
    while more {
        if consumed == 3 {
            // No fourth chunk exists in this format; the chain is corrupt.
            return Err(ErrorKind::Truncated(DecodingErrorKind::Separator));
        }
        let byte = *buffer
            .get(consumed)
            .ok_or(ErrorKind::Truncated(DecodingErrorKind::Separator))?;
        length = (length << 7) | (byte & 0x7f) as usize;
        more = byte & LXT_BIT != 0;
        consumed += 1;
    }

    Ok(DecodedSeparator { length, single_protocol, consumed })
}
