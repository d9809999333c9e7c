//! Note-lifecycle dispatch.
//!
//! The `Dispatcher` owns the handler table, the voice table and the recording
//! state. Inbound control messages are resolved to a `Route` and handled one
//! at a time; operations that must wait for the engine park a `Deferred`
//! continuation in the sync tracker and finish when `/synced` comes back.

mod args;
pub mod definition;
mod error;
pub mod registrar;
pub mod routes;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use rosc::{OscMessage, OscType};
use scbridge_types::{
    DefinitionError, InstrumentDef, NoteId, RecordingStatus, UnknownNotePolicy, FREQ, GATE, VOLUME,
};

use crate::config::DispatchSettings;
use crate::engine::backend::{BackendError, EngineBackend, ADD_TO_HEAD, ADD_TO_TAIL};
use crate::engine::{SyncTracker, GROUP_RECORD, GROUP_VOICES, ROOT_NODE};
use crate::recording::RecordingController;
use crate::voices::{mtof, NoteIdInUse, VoiceHandle, VoiceTable};

pub use definition::parse_definition;
pub use error::DispatchError;
pub use routes::{HandlerTable, Route};

pub const DONE_COMPILING: &str = "/done_compiling";

/// Whether the bridge should keep running after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// An outbound message for the controller side.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub target: SocketAddr,
    pub message: OscMessage,
}

/// Work waiting on an engine sync point.
#[derive(Debug, Clone, PartialEq)]
enum Deferred {
    AckCompile {
        name: String,
        reply_to: Option<SocketAddr>,
    },
    BeginRecording,
    EngineReady,
}

pub struct Dispatcher {
    backend: Box<dyn EngineBackend>,
    settings: DispatchSettings,
    routes: HandlerTable,
    instruments: HashMap<String, InstrumentDef>,
    voices: VoiceTable,
    recording: RecordingController,
    syncs: SyncTracker<Deferred>,
    next_node_id: i32,
    /// Where compile acks go when set; otherwise back to the compile sender.
    ack_target: Option<SocketAddr>,
}

impl Dispatcher {
    /// Build a dispatcher with the global routes and `instruments` registered.
    /// Any invalid instrument aborts construction.
    pub fn new(
        backend: Box<dyn EngineBackend>,
        settings: DispatchSettings,
        instruments: Vec<InstrumentDef>,
    ) -> Result<Self, DefinitionError> {
        let mut routes = HandlerTable::new();
        routes.install(registrar::global_routes(&settings.compile_address));

        let mut dispatcher = Self {
            backend,
            voices: VoiceTable::new(settings.release_policy),
            recording: RecordingController::new(settings.recording.clone()),
            syncs: SyncTracker::new(settings.sync_timeout),
            next_node_id: settings.first_node_id,
            settings,
            routes,
            instruments: HashMap::new(),
            ack_target: None,
        };
        for def in instruments {
            dispatcher.register_instrument(def)?;
        }
        Ok(dispatcher)
    }

    pub fn set_ack_target(&mut self, target: Option<SocketAddr>) {
        self.ack_target = target;
    }

    /// Install the routes for `def`, replacing any previous registration of
    /// the same name. Returns the number of routes installed.
    pub fn register_instrument(&mut self, def: InstrumentDef) -> Result<usize, DefinitionError> {
        let new_routes = registrar::instrument_routes(&self.settings.prefix, &def)?;
        let count = new_routes.len();

        let replaced = self.routes.remove_instrument(&def.name);
        self.routes.install(new_routes);
        if replaced > 0 {
            log::info!(target: "dispatch", "re-registered '{}' ({} routes, was {})", def.name, count, replaced);
        } else {
            log::info!(target: "dispatch", "registered '{}' ({} routes)", def.name, count);
        }
        self.instruments.insert(def.name.clone(), def);
        Ok(count)
    }

    /// Create the voice and record groups. Voices run before the recorder.
    pub fn setup_groups(&self) -> Result<(), BackendError> {
        self.backend.create_group(GROUP_VOICES, ADD_TO_HEAD, ROOT_NODE)?;
        self.backend.create_group(GROUP_RECORD, ADD_TO_TAIL, ROOT_NODE)?;
        Ok(())
    }

    /// Ask the engine for a sync point to confirm it is answering.
    pub fn check_engine(&mut self, now: Instant) -> Result<i32, BackendError> {
        let id = self.syncs.begin(now, Deferred::EngineReady);
        if let Err(e) = self.backend.sync(id) {
            self.syncs.cancel(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Handle one message from the controller.
    pub fn handle_control(
        &mut self,
        msg: &OscMessage,
        from: Option<SocketAddr>,
        now: Instant,
    ) -> Result<Flow, DispatchError> {
        let route = self
            .routes
            .resolve(&msg.addr)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownRoute(msg.addr.clone()))?;

        match route {
            Route::StartNote(instrument) => self.start_note(&instrument, msg, now)?,
            Route::EndNote(instrument) => {
                let id = args::note_id(&msg.args, 0).map_err(|e| DispatchError::bad_args(&msg.addr, e))?;
                if self.update_voice(&instrument, &id, GATE, 0.0)? {
                    self.voices.release(&id, now);
                }
            }
            Route::ChangePitch(instrument) => {
                let (id, pitch) = id_and_value(msg)?;
                self.update_voice(&instrument, &id, FREQ, mtof(pitch, self.settings.tuning_a4))?;
            }
            Route::ChangeVolume(instrument) => {
                let (id, volume) = id_and_value(msg)?;
                self.update_voice(&instrument, &id, VOLUME, volume)?;
            }
            Route::ChangeParameter { instrument, param } => {
                let (id, value) = id_and_value(msg)?;
                self.update_voice(&instrument, &id, &param, value)?;
            }
            Route::Compile => self.compile(msg, from, now)?,
            Route::RecordingStart => self.start_recording(msg, now)?,
            Route::RecordingStop => {
                if let Some(path) = self.recording.stop(self.backend.as_ref(), now)? {
                    log::info!(target: "dispatch", "recording saved to {}", path.display());
                }
            }
            Route::Quit => {
                let status = self.recording.status(now);
                if status.is_active() {
                    log::warn!(target: "dispatch", "quitting with a recording still active: {:?}", status);
                }
                log::info!(target: "dispatch", "quit requested");
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Handle one message from the engine. Replies produced by finished
    /// continuations are appended to `replies`.
    pub fn handle_engine(
        &mut self,
        msg: &OscMessage,
        now: Instant,
        replies: &mut Vec<Reply>,
    ) -> Result<(), DispatchError> {
        match msg.addr.as_str() {
            "/synced" => {
                let id = args::integer(&msg.args, 0).map_err(|e| DispatchError::bad_args(&msg.addr, e))? as i32;
                match self.syncs.complete(id) {
                    Some(deferred) => self.run_deferred(id, deferred, now, replies)?,
                    None => log::debug!(target: "dispatch", "/synced {} has no pending continuation", id),
                }
            }
            "/fail" => {
                log::warn!(target: "engine::osc", "engine reported failure: {}", describe_args(&msg.args));
            }
            "/done" => {
                log::debug!(target: "engine::osc", "engine done: {}", describe_args(&msg.args));
            }
            other => {
                log::trace!(target: "engine::osc", "ignoring engine message {}", other);
            }
        }
        Ok(())
    }

    /// Periodic housekeeping: expire overdue syncs, prune released voices,
    /// free flushed recording buffers.
    pub fn tick(&mut self, now: Instant) {
        for (id, deferred) in self.syncs.expire(now) {
            match deferred {
                Deferred::AckCompile { name, .. } => log::error!(
                    target: "dispatch",
                    "engine did not confirm '{}' within {:?}; no acknowledgment sent",
                    name,
                    self.syncs.timeout()
                ),
                Deferred::BeginRecording => {
                    self.recording.abort_armed(self.backend.as_ref(), id, now);
                }
                Deferred::EngineReady => log::warn!(
                    target: "dispatch",
                    "engine did not answer /sync within {:?}; is scsynth running?",
                    self.syncs.timeout()
                ),
            }
        }
        self.prune_voices(now);
        self.recording.poll(self.backend.as_ref(), now);
    }

    pub fn voices(&self) -> &VoiceTable {
        &self.voices
    }

    pub fn routes(&self) -> &HandlerTable {
        &self.routes
    }

    pub fn instrument(&self, name: &str) -> Option<&InstrumentDef> {
        self.instruments.get(name)
    }

    pub fn recording_status(&self, now: Instant) -> RecordingStatus {
        self.recording.status(now)
    }

    pub fn pending_syncs(&self) -> usize {
        self.syncs.pending_count()
    }

    fn start_note(&mut self, instrument: &str, msg: &OscMessage, now: Instant) -> Result<(), DispatchError> {
        self.prune_voices(now);

        let bad = |e: String| DispatchError::bad_args(&msg.addr, e);
        let id = args::note_id(&msg.args, 0).map_err(bad)?;
        let pitch = args::number(&msg.args, 1).map_err(bad)?;
        let volume = args::number(&msg.args, 2).map_err(bad)?;

        let def = self
            .instruments
            .get(instrument)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownRoute(msg.addr.clone()))?;

        if let Some(existing) = self.voices.get(&id) {
            return Err(NoteIdInUse {
                id,
                released: existing.is_released(),
            }
            .into());
        }

        let freq = mtof(pitch, self.settings.tuning_a4);
        let mut controls = vec![
            (FREQ.to_string(), freq),
            (VOLUME.to_string(), volume),
            (GATE.to_string(), 1.0),
        ];

        // Trailing (name, value) pairs override optional parameter defaults
        let extra = &msg.args[3.min(msg.args.len())..];
        if extra.len() % 2 != 0 {
            return Err(bad("parameter overrides must come in name/value pairs".to_string()));
        }
        for pair in extra.chunks(2) {
            let name = args::string(pair, 0).map_err(bad)?;
            let value = args::number(pair, 1).map_err(bad)?;
            if def.optional_params().any(|p| p.name == name) {
                controls.push((name.to_string(), value));
            } else {
                log::warn!(target: "dispatch", "{}: '{}' is not an optional parameter, ignored", instrument, name);
            }
        }

        let node_id = self.alloc_node_id();
        self.backend.create_synth(&def.name, node_id, GROUP_VOICES, &controls)?;

        let mut voice = VoiceHandle::new(instrument, node_id, now);
        for param in def.optional_params() {
            voice.params.insert(param.name.clone(), param.default);
        }
        voice.params.extend(controls);

        log::debug!(target: "dispatch", "{} note {} -> node {} ({:.2} Hz)", instrument, id, node_id, freq);
        self.voices.insert(id, voice)?;
        Ok(())
    }

    /// Set one control on the voice for `id`. Returns `false` when the note
    /// is unknown and the lookup policy says to ignore it.
    fn update_voice(
        &mut self,
        instrument: &str,
        id: &NoteId,
        param: &str,
        value: f32,
    ) -> Result<bool, DispatchError> {
        let Some(voice) = self.voices.get_for_mut(instrument, id) else {
            return match self.settings.unknown_note {
                UnknownNotePolicy::Strict => Err(DispatchError::UnknownNote {
                    instrument: instrument.to_string(),
                    id: id.clone(),
                }),
                UnknownNotePolicy::Ignore => {
                    log::debug!(target: "dispatch", "{}: no voice for note {}, {} ignored", instrument, id, param);
                    Ok(false)
                }
            };
        };
        self.backend.set_param(voice.node_id, param, value)?;
        voice.params.insert(param.to_string(), value);
        Ok(true)
    }

    fn compile(&mut self, msg: &OscMessage, from: Option<SocketAddr>, now: Instant) -> Result<(), DispatchError> {
        let text = args::string(&msg.args, 0).map_err(|e| DispatchError::bad_args(&msg.addr, e))?;
        let def = parse_definition(text, &self.instruments)?;
        def.validate()?;

        if let Some(bytes) = args::blob(&msg.args, 1) {
            self.backend.send_synthdef(bytes)?;
        } else if let Some(path) = &def.synthdef_path {
            self.backend.load_synthdef(path)?;
        }

        let name = def.name.clone();
        self.register_instrument(def)?;

        let reply_to = self.ack_target.or(from);
        let id = self.syncs.begin(now, Deferred::AckCompile { name: name.clone(), reply_to });
        if let Err(e) = self.backend.sync(id) {
            self.syncs.cancel(id);
            return Err(e.into());
        }
        log::debug!(target: "dispatch", "compiled '{}', waiting for sync {}", name, id);
        Ok(())
    }

    fn start_recording(&mut self, msg: &OscMessage, now: Instant) -> Result<(), DispatchError> {
        let bad = |e: String| DispatchError::bad_args(&msg.addr, e);
        let path = PathBuf::from(args::string(&msg.args, 0).map_err(bad)?);
        let channels = RecordingController::check_channels(args::integer(&msg.args, 1).map_err(bad)?)?;

        let id = self.syncs.begin(now, Deferred::BeginRecording);
        if let Err(e) = self.recording.prepare(self.backend.as_ref(), &path, channels, id, now) {
            self.syncs.cancel(id);
            return Err(e.into());
        }
        Ok(())
    }

    fn run_deferred(
        &mut self,
        id: i32,
        deferred: Deferred,
        now: Instant,
        replies: &mut Vec<Reply>,
    ) -> Result<(), DispatchError> {
        match deferred {
            Deferred::AckCompile { name, reply_to } => match reply_to {
                Some(target) => {
                    log::info!(target: "dispatch", "'{}' is ready, acknowledging to {}", name, target);
                    replies.push(Reply {
                        target,
                        message: OscMessage {
                            addr: DONE_COMPILING.to_string(),
                            args: vec![OscType::String(name)],
                        },
                    });
                }
                None => log::warn!(target: "dispatch", "'{}' is ready but there is no address to acknowledge to", name),
            },
            Deferred::BeginRecording => {
                let node_id = self.alloc_node_id();
                self.recording.begin(self.backend.as_ref(), id, node_id, now)?;
            }
            Deferred::EngineReady => {
                log::info!(target: "dispatch", "engine is answering (sync {})", id);
            }
        }
        Ok(())
    }

    fn prune_voices(&mut self, now: Instant) {
        for (id, voice) in self.voices.prune(now) {
            log::trace!(target: "dispatch", "pruned {} note {} (node {})", voice.instrument, id, voice.node_id);
        }
    }

    fn alloc_node_id(&mut self) -> i32 {
        let id = self.next_node_id;
        self.next_node_id = if id == i32::MAX {
            self.settings.first_node_id
        } else {
            id + 1
        };
        id
    }
}

fn id_and_value(msg: &OscMessage) -> Result<(NoteId, f32), DispatchError> {
    let id = args::note_id(&msg.args, 0).map_err(|e| DispatchError::bad_args(&msg.addr, e))?;
    let value = args::number(&msg.args, 1).map_err(|e| DispatchError::bad_args(&msg.addr, e))?;
    Ok((id, value))
}

fn describe_args(args: &[OscType]) -> String {
    args.iter()
        .map(|arg| match arg {
            OscType::String(s) => s.clone(),
            OscType::Int(v) => v.to_string(),
            OscType::Float(v) => v.to_string(),
            other => format!("{:?}", other),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
