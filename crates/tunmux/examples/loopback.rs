//! Muxes a handful of packets into one bundle and demuxes them back.
//!
//! Run with: cargo run --example loopback

use std::time::Instant;

use tunmux::{DeflateCompressor, MuxConfig, MuxSession};

fn main() {
    let mut config = MuxConfig::default();
    config.packet_count_limit = Some(3);

    let now = Instant::now();
    let mut sender = MuxSession::<DeflateCompressor>::new(config.clone(), None, now).unwrap();
    let mut receiver = MuxSession::<DeflateCompressor>::new(config, None, now).unwrap();

    let packets: [&[u8]; 3] = [b"alpha", b"beta", b"gamma"];
    let mut bundles = Vec::new();
    for packet in packets {
        let output = sender.offer_packet(packet, now).unwrap();
        bundles.extend(output.bundles);
    }
    println!("{} packets left in {} bundle(s)", packets.len(), bundles.len());

    for bundle in &bundles {
        let incoming = receiver.handle_bundle(&bundle.payload).unwrap();
        for packet in incoming.packets {
            println!("recovered: {}", String::from_utf8_lossy(&packet));
        }
    }
}
