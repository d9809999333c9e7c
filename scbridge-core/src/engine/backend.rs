//! Engine backend trait: a semantic-level abstraction over synthesis server operations.
//!
//! `EngineBackend` captures what the dispatcher *means* to do (create a voice, set a
//! control, prepare a buffer) independently of how it's done (OSC messages to scsynth).
//! This keeps the dispatch and recording logic testable without a running server.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::osc_client::OscClient;

pub type BackendResult<T = ()> = Result<T, BackendError>;

/// Error from a backend operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendError(pub String);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError(e.to_string())
    }
}

/// Server add actions used with `/s_new` and `/g_new`.
pub const ADD_TO_HEAD: i32 = 0;
pub const ADD_TO_TAIL: i32 = 1;

/// Each method is one meaningful server operation. Implementations translate
/// these into server commands (OSC for scsynth) or record them for tests.
pub trait EngineBackend: Send {
    /// Create a group node for execution ordering.
    fn create_group(&self, group_id: i32, add_action: i32, target: i32) -> BackendResult;

    /// Create a synth at the tail of `group_id` with named controls.
    fn create_synth(
        &self,
        def_name: &str,
        node_id: i32,
        group_id: i32,
        controls: &[(String, f32)],
    ) -> BackendResult;

    fn free_node(&self, node_id: i32) -> BackendResult;

    /// Set a single control on a node.
    fn set_param(&self, node_id: i32, param: &str, value: f32) -> BackendResult;

    /// Load a compiled SynthDef file that the server can read (`/d_load`).
    fn load_synthdef(&self, path: &Path) -> BackendResult;

    /// Send compiled SynthDef bytes to the server (`/d_recv`).
    fn send_synthdef(&self, bytes: &[u8]) -> BackendResult;

    fn alloc_buffer(&self, bufnum: i32, frames: i32, channels: i32) -> BackendResult;

    /// Open a buffer's soundfile for streaming disk writes.
    fn open_buffer_for_write(&self, bufnum: i32, path: &Path, header_format: &str) -> BackendResult;

    fn close_buffer(&self, bufnum: i32) -> BackendResult;

    fn free_buffer(&self, bufnum: i32) -> BackendResult;

    /// Ask the server to answer `/synced sync_id` once every earlier
    /// asynchronous command has completed.
    fn sync(&self, sync_id: i32) -> BackendResult;
}

// ─── SuperCollider Backend ──────────────────────────────────────────

/// Backend that sends scsynth commands through an `OscClient`.
pub struct ScBackend {
    client: OscClient,
}

impl ScBackend {
    pub fn new(client: OscClient) -> Self {
        Self { client }
    }
}

impl EngineBackend for ScBackend {
    fn create_group(&self, group_id: i32, add_action: i32, target: i32) -> BackendResult {
        Ok(self.client.create_group(group_id, add_action, target)?)
    }

    fn create_synth(&self, def_name: &str, node_id: i32, group_id: i32, controls: &[(String, f32)]) -> BackendResult {
        Ok(self.client.create_synth_in_group(def_name, node_id, group_id, controls)?)
    }

    fn free_node(&self, node_id: i32) -> BackendResult {
        Ok(self.client.free_node(node_id)?)
    }

    fn set_param(&self, node_id: i32, param: &str, value: f32) -> BackendResult {
        Ok(self.client.set_param(node_id, param, value)?)
    }

    fn load_synthdef(&self, path: &Path) -> BackendResult {
        Ok(self.client.load_synthdef(&path.to_string_lossy())?)
    }

    fn send_synthdef(&self, bytes: &[u8]) -> BackendResult {
        Ok(self.client.receive_synthdef(bytes.to_vec())?)
    }

    fn alloc_buffer(&self, bufnum: i32, frames: i32, channels: i32) -> BackendResult {
        Ok(self.client.alloc_buffer(bufnum, frames, channels)?)
    }

    fn open_buffer_for_write(&self, bufnum: i32, path: &Path, header_format: &str) -> BackendResult {
        Ok(self.client.open_buffer_for_write(bufnum, &path.to_string_lossy(), header_format)?)
    }

    fn close_buffer(&self, bufnum: i32) -> BackendResult {
        Ok(self.client.close_buffer(bufnum)?)
    }

    fn free_buffer(&self, bufnum: i32) -> BackendResult {
        Ok(self.client.free_buffer(bufnum)?)
    }

    fn sync(&self, sync_id: i32) -> BackendResult {
        Ok(self.client.sync(sync_id)?)
    }
}

/// Lets a test keep an `Arc` for assertions while the dispatcher owns a
/// `Box<dyn EngineBackend>` pointing at the same backend.
impl<B: EngineBackend + Sync> EngineBackend for Arc<B> {
    fn create_group(&self, group_id: i32, add_action: i32, target: i32) -> BackendResult {
        (**self).create_group(group_id, add_action, target)
    }
    fn create_synth(&self, def_name: &str, node_id: i32, group_id: i32, controls: &[(String, f32)]) -> BackendResult {
        (**self).create_synth(def_name, node_id, group_id, controls)
    }
    fn free_node(&self, node_id: i32) -> BackendResult {
        (**self).free_node(node_id)
    }
    fn set_param(&self, node_id: i32, param: &str, value: f32) -> BackendResult {
        (**self).set_param(node_id, param, value)
    }
    fn load_synthdef(&self, path: &Path) -> BackendResult {
        (**self).load_synthdef(path)
    }
    fn send_synthdef(&self, bytes: &[u8]) -> BackendResult {
        (**self).send_synthdef(bytes)
    }
    fn alloc_buffer(&self, bufnum: i32, frames: i32, channels: i32) -> BackendResult {
        (**self).alloc_buffer(bufnum, frames, channels)
    }
    fn open_buffer_for_write(&self, bufnum: i32, path: &Path, header_format: &str) -> BackendResult {
        (**self).open_buffer_for_write(bufnum, path, header_format)
    }
    fn close_buffer(&self, bufnum: i32) -> BackendResult {
        (**self).close_buffer(bufnum)
    }
    fn free_buffer(&self, bufnum: i32) -> BackendResult {
        (**self).free_buffer(bufnum)
    }
    fn sync(&self, sync_id: i32) -> BackendResult {
        (**self).sync(sync_id)
    }
}

// ─── Test Backend ───────────────────────────────────────────────────

/// An operation recorded by `TestBackend`.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOp {
    CreateGroup { group_id: i32, add_action: i32, target: i32 },
    CreateSynth { def_name: String, node_id: i32, group_id: i32, params: Vec<(String, f32)> },
    FreeNode(i32),
    SetParam { node_id: i32, param: String, value: f32 },
    LoadSynthDef(String),
    /// Byte length of the def sent.
    SendSynthDef(usize),
    AllocBuffer { bufnum: i32, num_frames: i32, num_channels: i32 },
    OpenBufferForWrite { bufnum: i32, path: String, header_format: String },
    CloseBuffer(i32),
    FreeBuffer(i32),
    Sync(i32),
}

/// Records every operation in order. All operations succeed unless
/// `fail_with` has been set, in which case nothing is recorded.
#[derive(Default)]
pub struct TestBackend {
    ops: Mutex<Vec<TestOp>>,
    failure: Mutex<Option<String>>,
    rejects: Mutex<Option<fn(&TestOp) -> bool>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<TestOp> {
        self.lock_ops().clone()
    }

    /// Make every subsequent operation fail with `reason` (`None` to recover).
    pub fn fail_with(&self, reason: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = reason.map(String::from);
        }
    }

    /// Fail only the operations matching `pred`; others are still recorded.
    pub fn reject_when(&self, pred: fn(&TestOp) -> bool) {
        if let Ok(mut rejects) = self.rejects.lock() {
            *rejects = Some(pred);
        }
    }

    pub fn count<F: Fn(&TestOp) -> bool>(&self, f: F) -> usize {
        self.lock_ops().iter().filter(|op| f(op)).count()
    }

    pub fn find<F: Fn(&TestOp) -> bool>(&self, f: F) -> Option<TestOp> {
        self.lock_ops().iter().find(|op| f(op)).cloned()
    }

    pub fn position<F: Fn(&TestOp) -> bool>(&self, f: F) -> Option<usize> {
        self.lock_ops().iter().position(f)
    }

    /// Ids of every `Sync` issued so far.
    pub fn sync_ids(&self) -> Vec<i32> {
        self.lock_ops()
            .iter()
            .filter_map(|op| match op {
                TestOp::Sync(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn lock_ops(&self) -> std::sync::MutexGuard<'_, Vec<TestOp>> {
        self.ops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, op: TestOp) -> BackendResult {
        let failure = match self.failure.lock() {
            Ok(failure) => failure.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(reason) = failure {
            return Err(BackendError(reason));
        }
        let rejects = match self.rejects.lock() {
            Ok(rejects) => *rejects,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if rejects.is_some_and(|pred| pred(&op)) {
            return Err(BackendError(format!("rejected {:?}", op)));
        }
        self.lock_ops().push(op);
        Ok(())
    }
}

impl EngineBackend for TestBackend {
    fn create_group(&self, group_id: i32, add_action: i32, target: i32) -> BackendResult {
        self.record(TestOp::CreateGroup { group_id, add_action, target })
    }

    fn create_synth(&self, def_name: &str, node_id: i32, group_id: i32, controls: &[(String, f32)]) -> BackendResult {
        self.record(TestOp::CreateSynth {
            def_name: def_name.to_string(),
            node_id,
            group_id,
            params: controls.to_vec(),
        })
    }

    fn free_node(&self, node_id: i32) -> BackendResult {
        self.record(TestOp::FreeNode(node_id))
    }

    fn set_param(&self, node_id: i32, param: &str, value: f32) -> BackendResult {
        self.record(TestOp::SetParam { node_id, param: param.to_string(), value })
    }

    fn load_synthdef(&self, path: &Path) -> BackendResult {
        self.record(TestOp::LoadSynthDef(path.display().to_string()))
    }

    fn send_synthdef(&self, bytes: &[u8]) -> BackendResult {
        self.record(TestOp::SendSynthDef(bytes.len()))
    }

    fn alloc_buffer(&self, bufnum: i32, frames: i32, channels: i32) -> BackendResult {
        self.record(TestOp::AllocBuffer { bufnum, num_frames: frames, num_channels: channels })
    }

    fn open_buffer_for_write(&self, bufnum: i32, path: &Path, header_format: &str) -> BackendResult {
        self.record(TestOp::OpenBufferForWrite {
            bufnum,
            path: path.display().to_string(),
            header_format: header_format.to_string(),
        })
    }

    fn close_buffer(&self, bufnum: i32) -> BackendResult {
        self.record(TestOp::CloseBuffer(bufnum))
    }

    fn free_buffer(&self, bufnum: i32) -> BackendResult {
        self.record(TestOp::FreeBuffer(bufnum))
    }

    fn sync(&self, sync_id: i32) -> BackendResult {
        self.record(TestOp::Sync(sync_id))
    }
}
