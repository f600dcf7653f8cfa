//! End-to-end driver tests over in-memory collaborators.

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tunmux_core::{
    config::{Flavor, MuxConfig},
    transport::Transport,
    tunnel::TunnelDevice,
};
use tunmux_engine::{Clock, MuxDriver, MuxEvent};
use tunmux_protocol::DeflateCompressor;

type PacketQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;
type AckQueue = Arc<Mutex<VecDeque<u16>>>;

/// Transport double backed by shared queues, so two drivers can be wired
/// back to back without sockets.
struct ChannelTransport {
    local: SocketAddr,
    peer: SocketAddr,
    outgoing: PacketQueue,
    incoming: PacketQueue,
    feedback_out: AckQueue,
    feedback_in: AckQueue,
}

impl Transport for ChannelTransport {
    fn send_bundle(&mut self, _addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.outgoing.lock().unwrap().push_back(payload.to_vec());
        Ok(payload.len())
    }

    fn receive_bundle<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        match self.incoming.lock().unwrap().pop_front() {
            Some(bundle) => {
                let len = bundle.len();
                buffer[..len].copy_from_slice(&bundle);
                Ok((&buffer[..len], self.peer))
            }
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no bundle pending")),
        }
    }

    fn poll_feedback(&mut self) -> io::Result<Option<u16>> {
        Ok(self.feedback_in.lock().unwrap().pop_front())
    }

    fn send_feedback(&mut self, _addr: &SocketAddr, sequence: u16) -> io::Result<()> {
        self.feedback_out.lock().unwrap().push_back(sequence);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn is_blocking_mode(&self) -> bool {
        false
    }
}

/// Tunnel device double: packets queued by the test come out of
/// `read_packet`, delivered packets are collected for inspection.
struct FakeTunnel {
    to_read: PacketQueue,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeTunnel {
    fn new() -> (Self, PacketQueue, Arc<Mutex<Vec<Vec<u8>>>>) {
        let to_read: PacketQueue = Arc::new(Mutex::new(VecDeque::new()));
        let written = Arc::new(Mutex::new(Vec::new()));
        let tunnel = FakeTunnel { to_read: to_read.clone(), written: written.clone() };
        (tunnel, to_read, written)
    }
}

impl TunnelDevice for FakeTunnel {
    fn read_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<&'a [u8]> {
        match self.to_read.lock().unwrap().pop_front() {
            Some(packet) => {
                let len = packet.len();
                buffer[..len].copy_from_slice(&packet);
                Ok(&buffer[..len])
            }
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no packet pending")),
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().push(packet.to_vec());
        Ok(packet.len())
    }
}

struct Link {
    left: ChannelTransport,
    right: ChannelTransport,
    left_to_right: PacketQueue,
}

/// Builds two crossed transports sharing wire and feedback queues.
fn link() -> Link {
    let addr_a: SocketAddr = "127.0.0.1:4001".parse().unwrap();
    let addr_b: SocketAddr = "127.0.0.1:4002".parse().unwrap();
    let a_to_b: PacketQueue = Arc::new(Mutex::new(VecDeque::new()));
    let b_to_a: PacketQueue = Arc::new(Mutex::new(VecDeque::new()));
    let ack_a_to_b: AckQueue = Arc::new(Mutex::new(VecDeque::new()));
    let ack_b_to_a: AckQueue = Arc::new(Mutex::new(VecDeque::new()));

    let left = ChannelTransport {
        local: addr_a,
        peer: addr_b,
        outgoing: a_to_b.clone(),
        incoming: b_to_a.clone(),
        feedback_out: ack_a_to_b.clone(),
        feedback_in: ack_b_to_a.clone(),
    };
    let right = ChannelTransport {
        local: addr_b,
        peer: addr_a,
        outgoing: b_to_a,
        incoming: a_to_b.clone(),
        feedback_out: ack_b_to_a,
        feedback_in: ack_a_to_b,
    };
    Link { left, right, left_to_right: a_to_b }
}

fn driver(
    transport: ChannelTransport,
    tunnel: FakeTunnel,
    config: MuxConfig,
) -> MuxDriver<ChannelTransport, FakeTunnel, DeflateCompressor> {
    let remote = transport.peer;
    MuxDriver::new(transport, tunnel, remote, config, None).unwrap()
}

#[test]
fn test_packets_cross_the_link() {
    let wires = link();
    let (tunnel_a, reads_a, _) = FakeTunnel::new();
    let (tunnel_b, _, written_b) = FakeTunnel::new();

    let mut sender = driver(wires.left, tunnel_a, MuxConfig::default());
    let mut receiver = driver(wires.right, tunnel_b, MuxConfig::default());

    reads_a.lock().unwrap().push_back(b"first packet".to_vec());
    reads_a.lock().unwrap().push_back(b"second packet".to_vec());

    let now = Instant::now();
    sender.manual_poll(now);
    receiver.manual_poll(now);

    let written = written_b.lock().unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0], b"first packet");
    assert_eq!(written[1], b"second packet");
}

#[test]
fn test_count_limit_bundles_multiple_packets() {
    let mut config = MuxConfig::default();
    config.packet_count_limit = Some(3);

    let wires = link();
    let wire = wires.left_to_right.clone();
    let (tunnel_a, reads_a, _) = FakeTunnel::new();
    let (tunnel_b, _, written_b) = FakeTunnel::new();

    let mut sender = driver(wires.left, tunnel_a, config.clone());
    let mut receiver = driver(wires.right, tunnel_b, config);

    for payload in [b"aa".as_slice(), b"bb", b"cc"] {
        reads_a.lock().unwrap().push_back(payload.to_vec());
    }

    let now = Instant::now();
    sender.manual_poll(now);

    // All three packets left in a single outer bundle.
    assert_eq!(wire.lock().unwrap().len(), 1);

    receiver.manual_poll(now);
    let written = written_b.lock().unwrap();
    assert_eq!(written.len(), 3);
    assert_eq!(written[1], b"bb");
}

#[test]
fn test_timeout_flushes_a_lone_packet() {
    let mut config = MuxConfig::default();
    config.timeout = Some(Duration::from_millis(50));

    let wires = link();
    let wire = wires.left_to_right.clone();
    let (tunnel_a, reads_a, _) = FakeTunnel::new();
    let mut sender = driver(wires.left, tunnel_a, config);

    reads_a.lock().unwrap().push_back(b"in no hurry".to_vec());

    let now = Instant::now();
    sender.manual_poll(now);
    assert!(wire.lock().unwrap().is_empty(), "timeout has not elapsed yet");

    sender.manual_poll(now + Duration::from_millis(60));
    assert_eq!(wire.lock().unwrap().len(), 1);
}

/// Clock pinned to a single instant, for driving deadlines by hand.
struct FixedClock(Instant);

impl Clock for FixedClock {
    fn now(&self) -> Instant {
        self.0
    }
}

#[test]
fn test_injected_clock_opens_the_first_flush_window() {
    let mut config = MuxConfig::default();
    config.timeout = Some(Duration::from_millis(50));

    let wires = link();
    let wire = wires.left_to_right.clone();
    let (tunnel_a, reads_a, _) = FakeTunnel::new();

    let start = Instant::now();
    let remote = wires.left.peer;
    let mut sender: MuxDriver<ChannelTransport, FakeTunnel, DeflateCompressor> =
        MuxDriver::new_with_clock(
            wires.left,
            tunnel_a,
            remote,
            config,
            None,
            Arc::new(FixedClock(start)),
        )
        .unwrap();

    reads_a.lock().unwrap().push_back(b"on the clock".to_vec());

    // The timeout window opened at the injected instant, not at wall time.
    sender.manual_poll(start);
    assert!(wire.lock().unwrap().is_empty());

    sender.manual_poll(start + Duration::from_millis(60));
    assert_eq!(wire.lock().unwrap().len(), 1);
}

#[test]
fn test_blast_ack_stops_retransmission() {
    let mut config = MuxConfig::default();
    config.flavor = Flavor::Blast;
    config.blast_retry_interval = Duration::from_millis(100);

    let wires = link();
    let wire = wires.left_to_right.clone();
    let (tunnel_a, reads_a, _) = FakeTunnel::new();
    let (tunnel_b, _, written_b) = FakeTunnel::new();

    let mut sender = driver(wires.left, tunnel_a, config.clone());
    let mut receiver = driver(wires.right, tunnel_b, config);

    reads_a.lock().unwrap().push_back(b"guaranteed".to_vec());

    let now = Instant::now();
    sender.manual_poll(now);
    assert_eq!(sender.session().in_flight(), 1);

    // Receiver delivers the packet and queues the acknowledgment.
    receiver.manual_poll(now);
    assert_eq!(written_b.lock().unwrap().len(), 1);

    // Sender drains the ack; well past the retry interval nothing goes out.
    sender.manual_poll(now + Duration::from_millis(10));
    assert_eq!(sender.session().in_flight(), 0);

    sender.manual_poll(now + Duration::from_millis(500));
    assert_eq!(wire.lock().unwrap().len(), 0, "no retransmission after the ack");
    assert_eq!(sender.recv_event(), None);
}

#[test]
fn test_blast_retransmits_until_lost_event() {
    let mut config = MuxConfig::default();
    config.flavor = Flavor::Blast;
    config.blast_retry_interval = Duration::from_millis(100);
    config.blast_retry_ceiling = 2;

    let wires = link();
    let wire = wires.left_to_right.clone();
    let (tunnel_a, reads_a, _) = FakeTunnel::new();
    let mut sender = driver(wires.left, tunnel_a, config);

    reads_a.lock().unwrap().push_back(b"into the void".to_vec());

    let mut now = Instant::now();
    sender.manual_poll(now);
    assert_eq!(wire.lock().unwrap().len(), 1);

    // The remote never answers: two retransmissions, then the loss report.
    for _ in 0..2 {
        now += Duration::from_millis(150);
        sender.manual_poll(now);
    }
    assert_eq!(wire.lock().unwrap().len(), 3);

    now += Duration::from_millis(150);
    sender.manual_poll(now);
    assert_eq!(wire.lock().unwrap().len(), 3);
    assert_eq!(sender.recv_event(), Some(MuxEvent::PacketLost(0)));
    assert_eq!(sender.recv_event(), None);
}

#[test]
fn test_malformed_bundle_is_discarded_with_event() {
    let wires = link();
    let (tunnel_b, _, written_b) = FakeTunnel::new();
    let mut receiver = driver(wires.right, tunnel_b, MuxConfig::default());

    // Separator announces five payload bytes, but only the protocol field
    // follows.
    wires.left_to_right.lock().unwrap().push_back(vec![0x05, 0x04]);

    receiver.manual_poll(Instant::now());
    assert!(written_b.lock().unwrap().is_empty());
    match receiver.recv_event() {
        Some(MuxEvent::MalformedBundle { size, .. }) => assert_eq!(size, 2),
        other => panic!("expected a malformed bundle event, got {:?}", other),
    }
}

#[test]
fn test_compression_roundtrip_over_the_link() {
    let wires = link();
    let wire = wires.left_to_right.clone();
    let (tunnel_a, reads_a, _) = FakeTunnel::new();
    let (tunnel_b, _, written_b) = FakeTunnel::new();

    let remote_a = wires.left.peer;
    let remote_b = wires.right.peer;
    let mut sender = MuxDriver::new(
        wires.left,
        tunnel_a,
        remote_a,
        MuxConfig::default(),
        Some(DeflateCompressor::default()),
    )
    .unwrap();
    let mut receiver = MuxDriver::new(
        wires.right,
        tunnel_b,
        remote_b,
        MuxConfig::default(),
        Some(DeflateCompressor::default()),
    )
    .unwrap();

    let packet = vec![0x45u8; 800]; // repetitive header bytes compress well
    reads_a.lock().unwrap().push_back(packet.clone());

    let now = Instant::now();
    sender.manual_poll(now);
    assert!(wire.lock().unwrap()[0].len() < packet.len());

    receiver.manual_poll(now);
    assert_eq!(written_b.lock().unwrap().as_slice(), &[packet]);
}
