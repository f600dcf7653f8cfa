//! Optional per-packet header compression seam.
//!
//! The engine only needs a narrow compress/decompress contract from the
//! external header-compression collaborator. The adapter applies it before
//! muxing and reverses it after demuxing, degrading gracefully: a failed
//! compression falls back to the native protocol id with the original
//! bytes, and a failed decompression drops that sub-packet only.

use std::io::{self, Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tunmux_core::constants::PROTOCOL_ROHC;

/// Contract implemented by the header-compression collaborator.
pub trait HeaderCompressor {
    /// Compresses one native packet.
    fn compress(&mut self, packet: &[u8]) -> io::Result<Vec<u8>>;

    /// Reverses `compress`, recovering the native packet.
    fn decompress(&mut self, compressed: &[u8]) -> io::Result<Vec<u8>>;
}

/// Per-packet transform applied around the multiplexing core.
#[derive(Debug)]
pub struct CompressionAdapter<C> {
    compressor: Option<C>,
    native_protocol: u16,
}

impl<C: HeaderCompressor> CompressionAdapter<C> {
    /// Creates an adapter. With no compressor, packets pass through tagged
    /// with the native protocol id.
    pub fn new(compressor: Option<C>, native_protocol: u16) -> Self {
        Self { compressor, native_protocol }
    }

    /// Returns the native (uncompressed) protocol id in use.
    pub fn native_protocol(&self) -> u16 {
        self.native_protocol
    }

    /// Transforms an outgoing native packet into (protocol id, bytes).
    ///
    /// Compression failure is not an engine error: the packet goes out
    /// unchanged under its native protocol id. The same fallback applies
    /// when compression would not shrink the packet.
    pub fn compress_outgoing(&mut self, packet: &[u8]) -> (u16, Vec<u8>) {
        let compressor = match self.compressor.as_mut() {
            Some(compressor) => compressor,
            None => return (self.native_protocol, packet.to_vec()),
        };
        match compressor.compress(packet) {
            Ok(compressed) if compressed.len() < packet.len() => (PROTOCOL_ROHC, compressed),
            Ok(_) => (self.native_protocol, packet.to_vec()),
            Err(err) => {
                tracing::warn!(
                    "header compression failed ({}), sending packet uncompressed",
                    err
                );
                (self.native_protocol, packet.to_vec())
            }
        }
    }

    /// Reverses the transform for one demultiplexed sub-packet.
    ///
    /// Returns None when the sub-packet must be dropped (decompression
    /// failure, or a compressed packet arriving with no compressor
    /// configured); the rest of the bundle continues to be processed.
    pub fn decompress_incoming(&mut self, protocol: u16, payload: &[u8]) -> Option<Vec<u8>> {
        if protocol != PROTOCOL_ROHC {
            return Some(payload.to_vec());
        }
        let compressor = match self.compressor.as_mut() {
            Some(compressor) => compressor,
            None => {
                tracing::warn!(
                    "dropping compressed sub-packet ({} bytes): no compressor configured",
                    payload.len()
                );
                return None;
            }
        };
        match compressor.decompress(payload) {
            Ok(packet) => Some(packet),
            Err(err) => {
                tracing::warn!(
                    "dropping sub-packet ({} bytes): decompression failed ({})",
                    payload.len(),
                    err
                );
                None
            }
        }
    }
}

/// Reference `HeaderCompressor` backed by zlib, for tests and demos.
///
/// A production deployment plugs in the real header-compression
/// collaborator instead.
#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl HeaderCompressor for DeflateCompressor {
    fn compress(&mut self, packet: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(packet)?;
        encoder.finish()
    }

    fn decompress(&mut self, compressed: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut packet = Vec::new();
        decoder.read_to_end(&mut packet)?;
        Ok(packet)
    }
}
