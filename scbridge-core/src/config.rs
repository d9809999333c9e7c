use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use scbridge_types::{InstrumentDef, ReleasePolicy, UnknownNotePolicy};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    bridge: BridgeConfig,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    recording: RecordingConfig,
    #[serde(default)]
    instruments: Vec<InstrumentDef>,
}

#[derive(Deserialize, Default)]
struct BridgeConfig {
    listen: Option<String>,
    coordinator: Option<String>,
    tick_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct EngineConfig {
    address: Option<String>,
    spawn: Option<bool>,
    scsynth_path: Option<PathBuf>,
    scsynth_args: Option<Vec<String>>,
    sync_timeout_ms: Option<u64>,
    first_node_id: Option<i32>,
}

#[derive(Deserialize, Default)]
struct DispatchConfig {
    prefix: Option<String>,
    compile_address: Option<String>,
    tuning_a4: Option<f32>,
    release_policy: Option<String>,
    linger_ms: Option<u64>,
    unknown_note: Option<String>,
}

#[derive(Deserialize, Default)]
struct RecordingConfig {
    bus: Option<i32>,
    bufnum: Option<i32>,
    buffer_frames: Option<i32>,
    flush_delay_ms: Option<u64>,
}

/// Sockets and loop cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub listen: String,
    pub coordinator: Option<String>,
    pub tick: Duration,
}

/// Where the synthesis server lives and whether we start it.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub address: String,
    pub spawn: bool,
    pub scsynth_path: Option<PathBuf>,
    pub scsynth_args: Vec<String>,
}

impl EngineSettings {
    pub fn port(&self) -> Option<u16> {
        self.address.rsplit(':').next().and_then(|p| p.parse().ok())
    }
}

/// Disk recording parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    pub bus: i32,
    pub bufnum: i32,
    pub buffer_frames: i32,
    pub flush_delay: Duration,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            bus: 0,
            bufnum: 900,
            buffer_frames: 131_072,
            flush_delay: Duration::from_millis(500),
        }
    }
}

/// Everything the dispatcher needs to route messages.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Prepended to every instrument channel, e.g. `/scamp` gives `/scamp/pluck/start_note`.
    pub prefix: String,
    pub compile_address: String,
    pub tuning_a4: f32,
    pub release_policy: ReleasePolicy,
    pub unknown_note: UnknownNotePolicy,
    pub sync_timeout: Duration,
    pub first_node_id: i32,
    pub recording: RecordingSettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            compile_address: "/compile/synth_def".to_string(),
            tuning_a4: 440.0,
            release_policy: ReleasePolicy::default(),
            unknown_note: UnknownNotePolicy::default(),
            sync_timeout: Duration::from_secs(5),
            first_node_id: 1000,
            recording: RecordingSettings::default(),
        }
    }
}

pub struct Config {
    pub bridge: BridgeSettings,
    pub engine: EngineSettings,
    pub dispatch: DispatchSettings,
    /// Instruments registered at startup.
    pub instruments: Vec<InstrumentDef>,
}

impl Config {
    /// Embedded defaults merged with the user config file, if any.
    pub fn load() -> Self {
        let mut base = embedded_file();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match read_config_file(&path) {
                    Ok(user) => merge(&mut base, user),
                    Err(e) => log::warn!(target: "config", "ignoring config {}: {}", path.display(), e),
                }
            }
        }

        Self::resolve(base)
    }

    /// Embedded defaults merged with an explicitly requested file.
    /// Unlike the implicit user file, a bad explicit file is an error.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let mut base = embedded_file();
        let user = read_config_file(path)?;
        merge(&mut base, user);
        Ok(Self::resolve(base))
    }

    /// Embedded defaults only.
    pub fn embedded() -> Self {
        Self::resolve(embedded_file())
    }

    fn resolve(file: ConfigFile) -> Self {
        let fallback = DispatchSettings::default();
        let recording_fallback = RecordingSettings::default();

        let release_policy = file
            .dispatch
            .release_policy
            .as_deref()
            .and_then(|s| parse_release_policy(s, file.dispatch.linger_ms))
            .unwrap_or(fallback.release_policy);
        let unknown_note = file
            .dispatch
            .unknown_note
            .as_deref()
            .and_then(parse_unknown_note)
            .unwrap_or(fallback.unknown_note);

        Config {
            bridge: BridgeSettings {
                listen: file.bridge.listen.unwrap_or_else(|| "127.0.0.1:0".to_string()),
                coordinator: file.bridge.coordinator,
                tick: Duration::from_millis(file.bridge.tick_ms.unwrap_or(50).clamp(1, 1000)),
            },
            engine: EngineSettings {
                address: file.engine.address.unwrap_or_else(|| "127.0.0.1:57110".to_string()),
                spawn: file.engine.spawn.unwrap_or(false),
                scsynth_path: file.engine.scsynth_path,
                scsynth_args: file.engine.scsynth_args.unwrap_or_default(),
            },
            dispatch: DispatchSettings {
                prefix: normalize_prefix(file.dispatch.prefix.as_deref().unwrap_or("")),
                compile_address: file
                    .dispatch
                    .compile_address
                    .unwrap_or(fallback.compile_address),
                tuning_a4: file
                    .dispatch
                    .tuning_a4
                    .filter(|a4| *a4 > 0.0)
                    .unwrap_or(fallback.tuning_a4),
                release_policy,
                unknown_note,
                sync_timeout: file
                    .engine
                    .sync_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(fallback.sync_timeout),
                first_node_id: file
                    .engine
                    .first_node_id
                    .unwrap_or(fallback.first_node_id),
                recording: RecordingSettings {
                    bus: file.recording.bus.unwrap_or(recording_fallback.bus),
                    bufnum: file.recording.bufnum.unwrap_or(recording_fallback.bufnum),
                    buffer_frames: file
                        .recording
                        .buffer_frames
                        .unwrap_or(recording_fallback.buffer_frames),
                    flush_delay: file
                        .recording
                        .flush_delay_ms
                        .map(Duration::from_millis)
                        .unwrap_or(recording_fallback.flush_delay),
                },
            },
            instruments: file.instruments,
        }
    }
}

/// `~/.config/scbridge` (or platform equivalent), falling back to `./scbridge`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scbridge")
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scbridge").join("config.toml"))
}

fn embedded_file() -> ConfigFile {
    // The embedded file is covered by tests; a parse failure here is a build defect.
    toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
        log::error!(target: "config", "embedded config.toml is invalid: {}", e);
        ConfigFile::default()
    })
}

fn read_config_file(path: &Path) -> Result<ConfigFile, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read {}: {}", path.display(), e))?;
    toml::from_str(&contents).map_err(|e| format!("malformed {}: {}", path.display(), e))
}

fn merge_opt<T>(base: &mut Option<T>, user: Option<T>) {
    if user.is_some() {
        *base = user;
    }
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    merge_opt(&mut base.bridge.listen, user.bridge.listen);
    merge_opt(&mut base.bridge.coordinator, user.bridge.coordinator);
    merge_opt(&mut base.bridge.tick_ms, user.bridge.tick_ms);

    merge_opt(&mut base.engine.address, user.engine.address);
    merge_opt(&mut base.engine.spawn, user.engine.spawn);
    merge_opt(&mut base.engine.scsynth_path, user.engine.scsynth_path);
    merge_opt(&mut base.engine.scsynth_args, user.engine.scsynth_args);
    merge_opt(&mut base.engine.sync_timeout_ms, user.engine.sync_timeout_ms);
    merge_opt(&mut base.engine.first_node_id, user.engine.first_node_id);

    merge_opt(&mut base.dispatch.prefix, user.dispatch.prefix);
    merge_opt(&mut base.dispatch.compile_address, user.dispatch.compile_address);
    merge_opt(&mut base.dispatch.tuning_a4, user.dispatch.tuning_a4);
    merge_opt(&mut base.dispatch.release_policy, user.dispatch.release_policy);
    merge_opt(&mut base.dispatch.linger_ms, user.dispatch.linger_ms);
    merge_opt(&mut base.dispatch.unknown_note, user.dispatch.unknown_note);

    merge_opt(&mut base.recording.bus, user.recording.bus);
    merge_opt(&mut base.recording.bufnum, user.recording.bufnum);
    merge_opt(&mut base.recording.buffer_frames, user.recording.buffer_frames);
    merge_opt(&mut base.recording.flush_delay_ms, user.recording.flush_delay_ms);

    // User instruments replace built-in ones with the same name.
    for def in user.instruments {
        base.instruments.retain(|d| d.name != def.name);
        base.instruments.push(def);
    }
}

/// `""`, `"/"` and `"scamp/"` become `""`, `""` and `"/scamp"`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parse_release_policy(s: &str, linger_ms: Option<u64>) -> Option<ReleasePolicy> {
    match s.to_lowercase().as_str() {
        "retain" | "keep" => Some(ReleasePolicy::Retain),
        "remove" | "drop" => Some(ReleasePolicy::Remove),
        "linger" => Some(ReleasePolicy::Linger(Duration::from_millis(
            linger_ms.unwrap_or(5000),
        ))),
        other => {
            log::warn!(target: "config", "unknown release_policy '{}'", other);
            None
        }
    }
}

fn parse_unknown_note(s: &str) -> Option<UnknownNotePolicy> {
    match s.to_lowercase().as_str() {
        "strict" => Some(UnknownNotePolicy::Strict),
        "ignore" => Some(UnknownNotePolicy::Ignore),
        "auto" => Some(UnknownNotePolicy::for_build()),
        other => {
            log::warn!(target: "config", "unknown unknown_note policy '{}'", other);
            None
        }
    }
}
