#![allow(dead_code)]
//! Test harness for scbridge-core integration tests: a fake scsynth that
//! answers `/sync`, and a controller socket playing the composition program.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rosc::{OscMessage, OscPacket, OscType};
use scbridge_core::bridge::{flatten, Bridge};
use scbridge_core::config::Config;
use scbridge_types::{InstrumentDef, ParamSpec, ReleasePolicy, UnknownNotePolicy};

pub const TIMEOUT: Duration = Duration::from_secs(3);

fn encode(addr: &str, args: Vec<OscType>) -> Vec<u8> {
    rosc::encoder::encode(&OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    }))
    .unwrap()
}

/// Stands in for scsynth: records every command and answers `/sync id`
/// with `/synced id`.
pub struct FakeEngine {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<OscMessage>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeEngine {
    pub fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let log = Arc::clone(&received);
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; 65_536];
            while !flag.load(Ordering::Relaxed) {
                let Ok((n, from)) = socket.recv_from(&mut buf) else {
                    continue;
                };
                let Ok((_, packet)) = rosc::decoder::decode_udp(&buf[..n]) else {
                    continue;
                };
                for msg in flatten(packet) {
                    if msg.addr == "/sync" {
                        let reply = encode("/synced", msg.args.clone());
                        let _ = socket.send_to(&reply, from);
                    }
                    log.lock().unwrap().push(msg);
                }
            }
        });

        Self {
            addr,
            received,
            stop,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn messages(&self) -> Vec<OscMessage> {
        self.received.lock().unwrap().clone()
    }

    /// Wait until a received command matches `pred`, returning it.
    pub fn wait_for<F: Fn(&OscMessage) -> bool>(&self, pred: F) -> Option<OscMessage> {
        let start = Instant::now();
        while start.elapsed() < TIMEOUT {
            if let Some(msg) = self.received.lock().unwrap().iter().find(|m| pred(m)) {
                return Some(msg.clone());
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The composition program's side: sends control messages and receives the
/// handshake and compile acknowledgments on the same socket.
pub struct Controller {
    socket: UdpSocket,
    bridge: Option<SocketAddr>,
}

impl Controller {
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        Self { socket, bridge: None }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub fn connect_to(&mut self, bridge: SocketAddr) {
        self.bridge = Some(bridge);
    }

    pub fn send(&self, addr: &str, args: Vec<OscType>) {
        let bridge = self.bridge.expect("controller not connected to a bridge");
        self.socket.send_to(&encode(addr, args), bridge).unwrap();
    }

    pub fn send_packet(&self, packet: &OscPacket) {
        let bridge = self.bridge.expect("controller not connected to a bridge");
        let buf = rosc::encoder::encode(packet).unwrap();
        self.socket.send_to(&buf, bridge).unwrap();
    }

    /// Next message with address `addr`, skipping others.
    pub fn recv(&self, addr: &str) -> Option<OscMessage> {
        let start = Instant::now();
        let mut buf = vec![0u8; 65_536];
        while start.elapsed() < TIMEOUT {
            let Ok((n, _)) = self.socket.recv_from(&mut buf) else {
                continue;
            };
            let Ok((_, packet)) = rosc::decoder::decode_udp(&buf[..n]) else {
                continue;
            };
            if let Some(msg) = flatten(packet).into_iter().find(|m| m.addr == addr) {
                return Some(msg);
            }
        }
        None
    }
}

pub fn pluck() -> InstrumentDef {
    let mut def = InstrumentDef::with_mandatory("pluck");
    def.params.push(ParamSpec::new("cutoff", 2000.0));
    def
}

/// Embedded defaults pointed at a fake engine and a controller.
pub fn test_config(engine: &FakeEngine, controller: &Controller) -> Config {
    let mut config = Config::embedded();
    config.bridge.listen = "127.0.0.1:0".to_string();
    config.bridge.coordinator = Some(controller.addr().to_string());
    config.bridge.tick = Duration::from_millis(10);
    config.engine.address = engine.addr().to_string();
    config.dispatch.release_policy = ReleasePolicy::Retain;
    config.dispatch.unknown_note = UnknownNotePolicy::Strict;
    config.instruments = vec![pluck()];
    config
}

/// Running bridge on its own thread.
pub struct RunningBridge {
    pub addr: SocketAddr,
    handle: JoinHandle<io::Result<()>>,
}

impl RunningBridge {
    pub fn start(config: &Config) -> Self {
        let mut bridge = Bridge::connect(config).unwrap();
        let addr = bridge.local_addr().unwrap();
        let handle = thread::spawn(move || bridge.run());
        Self { addr, handle }
    }

    /// Wait for the bridge thread to return after `/quit`.
    pub fn join(self) -> io::Result<()> {
        let start = Instant::now();
        while !self.handle.is_finished() {
            assert!(start.elapsed() < TIMEOUT, "bridge did not stop");
            thread::sleep(Duration::from_millis(5));
        }
        self.handle.join().unwrap()
    }
}

/// Controller connected to a freshly started bridge, with the handshake consumed.
pub fn connected() -> (FakeEngine, Controller, RunningBridge) {
    let engine = FakeEngine::start();
    let mut controller = Controller::bind();
    let bridge = RunningBridge::start(&test_config(&engine, &controller));
    controller
        .recv("/supercollider/port")
        .expect("no handshake from bridge");
    controller.connect_to(bridge.addr);
    (engine, controller, bridge)
}
