//! UDP plumbing around the dispatcher.
//!
//! Two receive threads (controller socket, engine socket) only decode OSC and
//! forward packets over a channel. The thread calling `Bridge::run` owns the
//! `Dispatcher` and handles every event in arrival order.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rosc::{OscMessage, OscPacket, OscType};
use scbridge_types::DefinitionError;

use crate::config::Config;
use crate::dispatch::{DispatchError, Dispatcher, Flow, Reply};
use crate::engine::{OscClient, ScBackend};

/// Sent once to the coordinator at startup, carrying our listening port.
pub const HANDSHAKE: &str = "/supercollider/port";

const RECV_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_PACKET: usize = 65_536;

pub enum BridgeEvent {
    Control { packet: OscPacket, from: SocketAddr },
    Engine(OscPacket),
}

#[derive(Debug)]
pub enum BridgeError {
    Io(io::Error),
    Definition(DefinitionError),
    Address(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Io(e) => write!(f, "socket error: {}", e),
            BridgeError::Definition(e) => write!(f, "{}", e),
            BridgeError::Address(addr) => write!(f, "cannot resolve address '{}'", addr),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<io::Error> for BridgeError {
    fn from(e: io::Error) -> Self {
        BridgeError::Io(e)
    }
}

impl From<DefinitionError> for BridgeError {
    fn from(e: DefinitionError) -> Self {
        BridgeError::Definition(e)
    }
}

pub struct Bridge {
    dispatcher: Dispatcher,
    control: UdpSocket,
    coordinator: Option<SocketAddr>,
    tick: Duration,
    events: Receiver<BridgeEvent>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Bind the controller socket, connect to the engine and register the
    /// configured instruments. Nothing is sent until `run`.
    pub fn connect(config: &Config) -> Result<Self, BridgeError> {
        let client = OscClient::new(&config.engine.address)?;
        let engine_socket = client.try_clone_socket()?;
        let backend = ScBackend::new(client);

        let coordinator = match &config.bridge.coordinator {
            Some(addr) => Some(resolve(addr)?),
            None => None,
        };

        let mut dispatcher = Dispatcher::new(
            Box::new(backend),
            config.dispatch.clone(),
            config.instruments.clone(),
        )?;
        dispatcher.set_ack_target(coordinator);

        let control = UdpSocket::bind(&config.bridge.listen)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let threads = vec![
            spawn_receiver(
                "scbridge-control",
                control.try_clone()?,
                Arc::clone(&stop),
                tx.clone(),
                |packet, from| BridgeEvent::Control { packet, from },
            )?,
            spawn_receiver(
                "scbridge-engine",
                engine_socket,
                Arc::clone(&stop),
                tx,
                |packet, _| BridgeEvent::Engine(packet),
            )?,
        ];

        log::info!(
            target: "bridge",
            "listening on {}, engine at {}",
            control.local_addr()?,
            config.engine.address
        );

        Ok(Self {
            dispatcher,
            control,
            coordinator,
            tick: config.bridge.tick,
            events: rx,
            stop,
            threads,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.control.local_addr()
    }

    /// Handshake, prepare the engine, then dispatch until `/quit`.
    pub fn run(&mut self) -> io::Result<()> {
        self.handshake()?;
        for channel in self.dispatcher.routes().channels() {
            log::debug!(target: "bridge", "bound {}", channel);
        }

        if let Err(e) = self.dispatcher.setup_groups() {
            log::warn!(target: "bridge", "could not create server groups: {}", e);
        }
        if let Err(e) = self.dispatcher.check_engine(Instant::now()) {
            log::warn!(target: "bridge", "could not reach engine: {}", e);
        }

        let mut last_tick = Instant::now();
        loop {
            match self.events.recv_timeout(self.tick) {
                Ok(event) => {
                    if self.handle_event(event) == Flow::Quit {
                        log::info!(target: "bridge", "stopping");
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!(target: "bridge", "receive threads exited; stopping");
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now.duration_since(last_tick) >= self.tick {
                self.dispatcher.tick(now);
                last_tick = now;
            }
        }
    }

    fn handshake(&self) -> io::Result<()> {
        let Some(coordinator) = self.coordinator else {
            log::debug!(target: "bridge", "no coordinator configured, skipping handshake");
            return Ok(());
        };
        let port = self.control.local_addr()?.port();
        self.send(
            coordinator,
            &OscMessage {
                addr: HANDSHAKE.to_string(),
                args: vec![OscType::Int(port as i32)],
            },
        )?;
        log::info!(target: "bridge", "announced port {} to {}", port, coordinator);
        Ok(())
    }

    fn handle_event(&mut self, event: BridgeEvent) -> Flow {
        let now = Instant::now();
        match event {
            BridgeEvent::Control { packet, from } => {
                for msg in flatten(packet) {
                    match self.dispatcher.handle_control(&msg, Some(from), now) {
                        Ok(Flow::Quit) => return Flow::Quit,
                        Ok(Flow::Continue) => {}
                        Err(e) => log_dispatch_error(&msg.addr, &e),
                    }
                }
            }
            BridgeEvent::Engine(packet) => {
                let mut replies = Vec::new();
                for msg in flatten(packet) {
                    if let Err(e) = self.dispatcher.handle_engine(&msg, now, &mut replies) {
                        log_dispatch_error(&msg.addr, &e);
                    }
                }
                for Reply { target, message } in replies {
                    if let Err(e) = self.send(target, &message) {
                        log::warn!(target: "bridge", "could not send {} to {}: {}", message.addr, target, e);
                    }
                }
            }
        }
        Flow::Continue
    }

    fn send(&self, target: SocketAddr, message: &OscMessage) -> io::Result<()> {
        let buf = rosc::encoder::encode(&OscPacket::Message(message.clone()))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.control.send_to(&buf, target)?;
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn resolve(addr: &str) -> Result<SocketAddr, BridgeError> {
    addr.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| BridgeError::Address(addr.to_string()))
}

fn spawn_receiver(
    name: &str,
    socket: UdpSocket,
    stop: Arc<AtomicBool>,
    tx: Sender<BridgeEvent>,
    wrap: fn(OscPacket, SocketAddr) -> BridgeEvent,
) -> io::Result<JoinHandle<()>> {
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    let label = name.to_string();
    thread::Builder::new().name(label.clone()).spawn(move || {
        let mut buf = vec![0u8; MAX_PACKET];
        while !stop.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => match rosc::decoder::decode_udp(&buf[..n]) {
                    Ok((_, packet)) => {
                        if tx.send(wrap(packet, from)).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!(target: "bridge", "{}: undecodable packet from {}: {}", label, from, e),
                },
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    log::error!(target: "bridge", "{}: receive failed: {}", label, e);
                    break;
                }
            }
        }
    })
}

/// Messages of a packet in order, bundles unwrapped recursively.
pub fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(msg) => vec![msg],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten).collect(),
    }
}

fn log_dispatch_error(addr: &str, e: &DispatchError) {
    match e {
        DispatchError::Engine(_) => log::error!(target: "dispatch", "{}: {}", addr, e),
        _ => log::warn!(target: "dispatch", "{}: {}", addr, e),
    }
}
