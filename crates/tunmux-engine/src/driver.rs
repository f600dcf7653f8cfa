//! Poll-driven driver loop.
//!
//! `MuxDriver` owns the session plus its two collaborators (outer transport
//! and tunnel device) and moves bytes between them on every poll: drain the
//! tunnel, drain the transport, drain the feedback channel, then run the
//! scheduling tick. Link-level conditions surface as `MuxEvent`s on a
//! channel the application can drain at its own pace.

use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{sleep, yield_now},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::{error, warn};
use tunmux_core::{
    config::MuxConfig, error::Result, transport::Transport, tunnel::TunnelDevice,
};
use tunmux_protocol::compression::HeaderCompressor;

use crate::{
    event_types::MuxEvent,
    session::{MuxSession, SessionOutput},
};

/// Time source the driver polls with. Production drivers use `SystemClock`;
/// tests inject a scripted clock so trigger deadlines and blast retries can
/// be stepped deterministically without sleeping.
pub trait Clock: Send + Sync + 'static {
    /// The instant fed to `manual_poll` by the polling loop.
    fn now(&self) -> Instant;
}

/// Clock reading the monotonic system time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Drives one multiplexed link between a tunnel device and a transport.
pub struct MuxDriver<T, D, C> {
    transport: T,
    tunnel: D,
    session: MuxSession<C>,
    remote: SocketAddr,
    event_sender: Sender<MuxEvent>,
    event_receiver: Receiver<MuxEvent>,
    receive_buffer: Vec<u8>,
    tunnel_buffer: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl<T, D, C> MuxDriver<T, D, C>
where
    T: Transport,
    D: TunnelDevice,
    C: HeaderCompressor,
{
    /// Creates a driver for the given remote endpoint using the system clock.
    pub fn new(
        transport: T,
        tunnel: D,
        remote: SocketAddr,
        config: MuxConfig,
        compressor: Option<C>,
    ) -> Result<Self> {
        Self::new_with_clock(
            transport,
            tunnel,
            remote,
            config,
            compressor,
            Arc::new(SystemClock::default()),
        )
    }

    /// Creates a driver with a custom clock for testing.
    pub fn new_with_clock(
        transport: T,
        tunnel: D,
        remote: SocketAddr,
        config: MuxConfig,
        compressor: Option<C>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (event_sender, event_receiver) = unbounded();
        let buffer_size = config.receive_buffer_max_size;
        let session = MuxSession::new(config, compressor, clock.now())?;
        Ok(Self {
            transport,
            tunnel,
            session,
            remote,
            event_sender,
            event_receiver,
            receive_buffer: vec![0; buffer_size],
            tunnel_buffer: vec![0; buffer_size],
            clock,
        })
    }

    /// Returns the session driving this link.
    pub fn session(&self) -> &MuxSession<C> {
        &self.session
    }

    /// Returns the local address of the underlying transport.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Returns a clone of the event receiver channel for link events.
    pub fn event_receiver(&self) -> Receiver<MuxEvent> {
        self.event_receiver.clone()
    }

    /// Receives the next pending link event, if any.
    pub fn recv_event(&mut self) -> Option<MuxEvent> {
        match self.event_receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!("This can never happen"),
        }
    }

    /// Starts automatic polling in a loop with 1ms intervals (blocking call).
    pub fn start_polling(&mut self) {
        self.start_polling_with_duration(Some(Duration::from_millis(1)))
    }

    /// Starts automatic polling with a custom sleep between polls (blocking
    /// call).
    pub fn start_polling_with_duration(&mut self, sleep_duration: Option<Duration>) {
        loop {
            self.manual_poll(self.clock.now());
            match sleep_duration {
                None => yield_now(),
                Some(duration) => sleep(duration),
            };
        }
    }

    /// How long the caller may sleep before the next `manual_poll` has
    /// time-driven work to do.
    pub fn next_tick(&self, now: Instant) -> Option<Duration> {
        self.session.next_tick(now)
    }

    /// Moves packets in both directions and runs the scheduling tick.
    pub fn manual_poll(&mut self, time: Instant) {
        // Native packets leaving through the tunnel device.
        loop {
            let output = match self.tunnel.read_packet(self.tunnel_buffer.as_mut()) {
                Ok(packet) => self.session.offer_packet(packet, time),
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        error!("error reading from the tunnel device: {}", err);
                    }
                    break;
                }
            };
            match output {
                Ok(output) => self.dispatch(output),
                Err(err) => error!("error multiplexing a tunnel packet: {}", err),
            }
        }

        // Bundles arriving from the remote endpoint.
        loop {
            match self.transport.receive_bundle(self.receive_buffer.as_mut()) {
                Ok((payload, address)) => {
                    let size = payload.len();
                    match self.session.handle_bundle(payload) {
                        Ok(incoming) => {
                            if let Some(sequence) = incoming.ack {
                                if let Err(err) =
                                    self.transport.send_feedback(&address, sequence)
                                {
                                    error!(
                                        "error acknowledging seq {} (to {}): {}",
                                        sequence, address, err
                                    );
                                }
                            }
                            for packet in incoming.packets {
                                if let Err(err) = self.tunnel.write_packet(&packet) {
                                    error!("error writing to the tunnel device: {}", err);
                                }
                            }
                        }
                        Err(err) => {
                            warn!(
                                "discarding malformed bundle from {} ({} bytes): {}",
                                address, size, err
                            );
                            self.event_sender
                                .send(MuxEvent::MalformedBundle { from: address, size })
                                .expect("Receiver must exist");
                        }
                    }
                }
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        error!("encountered an error receiving a bundle: {:?}", err);
                    }
                    break;
                }
            }
            if self.transport.is_blocking_mode() {
                break;
            }
        }

        // Acknowledgments from the feedback channel.
        loop {
            match self.transport.poll_feedback() {
                Ok(Some(sequence)) => {
                    self.session.handle_ack(sequence);
                }
                Ok(None) => break,
                Err(err) => {
                    error!("error polling the feedback channel: {}", err);
                    break;
                }
            }
        }

        match self.session.on_tick(time) {
            Ok(output) => self.dispatch(output),
            Err(err) => error!("error running the scheduling tick: {}", err),
        }
    }

    fn dispatch(&mut self, output: SessionOutput) {
        for bundle in output.bundles {
            if let Err(err) = self.transport.send_bundle(&self.remote, &bundle.payload) {
                error!("error occurred sending a bundle (to {}): {}", self.remote, err);
            }
        }
        for sequence in output.lost {
            self.event_sender
                .send(MuxEvent::PacketLost(sequence))
                .expect("Receiver must exist");
        }
        for sequence in output.sequence_reuse {
            self.event_sender
                .send(MuxEvent::SequenceReuse(sequence))
                .expect("Receiver must exist");
        }
    }
}

impl<T, D, C> std::fmt::Debug for MuxDriver<T, D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxDriver").field("remote", &self.remote).finish()
    }
}
