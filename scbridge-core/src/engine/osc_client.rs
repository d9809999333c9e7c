use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType};

use super::backend::ADD_TO_TAIL;

/// Fire-and-forget OSC sender for scsynth commands.
///
/// Replies (`/synced`, `/done`, `/fail`) come back to this socket's local port;
/// the bridge reads them from a clone obtained with `try_clone_socket`.
pub struct OscClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
}

impl OscClient {
    pub fn new(server_addr: &str) -> io::Result<Self> {
        let server_addr = server_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("unresolvable engine address: {}", server_addr)))?;
        let bind_addr = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(Self { socket, server_addr })
    }

    pub fn try_clone_socket(&self) -> io::Result<UdpSocket> {
        self.socket.try_clone()
    }

    pub fn send_message(&self, addr: &str, args: Vec<OscType>) -> io::Result<()> {
        let msg = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let buf = rosc::encoder::encode(&msg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        log::trace!(target: "engine::osc", "-> {} ({} bytes)", addr, buf.len());
        self.socket.send_to(&buf, self.server_addr)?;
        Ok(())
    }

    /// /g_new group_id add_action target
    pub fn create_group(&self, group_id: i32, add_action: i32, target: i32) -> io::Result<()> {
        self.send_message("/g_new", vec![
            OscType::Int(group_id),
            OscType::Int(add_action),
            OscType::Int(target),
        ])
    }

    /// /s_new synthdef node_id addToTail(1) group [param value ...]
    pub fn create_synth_in_group(&self, synth_def: &str, node_id: i32, group_id: i32, params: &[(String, f32)]) -> io::Result<()> {
        let mut args: Vec<OscType> = vec![
            OscType::String(synth_def.to_string()),
            OscType::Int(node_id),
            OscType::Int(ADD_TO_TAIL),
            OscType::Int(group_id),
        ];
        for (name, value) in params {
            args.push(OscType::String(name.clone()));
            args.push(OscType::Float(*value));
        }
        self.send_message("/s_new", args)
    }

    pub fn free_node(&self, node_id: i32) -> io::Result<()> {
        self.send_message("/n_free", vec![OscType::Int(node_id)])
    }

    pub fn set_param(&self, node_id: i32, param: &str, value: f32) -> io::Result<()> {
        self.send_message("/n_set", vec![
            OscType::Int(node_id),
            OscType::String(param.to_string()),
            OscType::Float(value),
        ])
    }

    /// /d_load path
    pub fn load_synthdef(&self, path: &str) -> io::Result<()> {
        self.send_message("/d_load", vec![OscType::String(path.to_string())])
    }

    /// /d_recv bytes
    pub fn receive_synthdef(&self, bytes: Vec<u8>) -> io::Result<()> {
        self.send_message("/d_recv", vec![OscType::Blob(bytes)])
    }

    /// /b_alloc bufnum numFrames numChannels
    pub fn alloc_buffer(&self, bufnum: i32, num_frames: i32, num_channels: i32) -> io::Result<()> {
        self.send_message("/b_alloc", vec![
            OscType::Int(bufnum),
            OscType::Int(num_frames),
            OscType::Int(num_channels),
        ])
    }

    /// /b_write bufnum path headerFormat sampleFormat numFrames startFrame leaveOpen
    /// Opens the file for DiskOut streaming (32-bit float, left open).
    pub fn open_buffer_for_write(&self, bufnum: i32, path: &str, header_format: &str) -> io::Result<()> {
        self.send_message("/b_write", vec![
            OscType::Int(bufnum),
            OscType::String(path.to_string()),
            OscType::String(header_format.to_string()),
            OscType::String("float".to_string()),
            OscType::Int(0),  // numFrames (0 = all)
            OscType::Int(0),  // startFrame
            OscType::Int(1),  // leaveOpen = 1
        ])
    }

    /// /b_close bufnum
    pub fn close_buffer(&self, bufnum: i32) -> io::Result<()> {
        self.send_message("/b_close", vec![OscType::Int(bufnum)])
    }

    /// /b_free bufnum
    pub fn free_buffer(&self, bufnum: i32) -> io::Result<()> {
        self.send_message("/b_free", vec![OscType::Int(bufnum)])
    }

    /// /sync id; answered with /synced id
    pub fn sync(&self, sync_id: i32) -> io::Result<()> {
        self.send_message("/sync", vec![OscType::Int(sync_id)])
    }
}
