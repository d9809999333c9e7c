//! Disk recording of the engine's output.
//!
//! Recording is two-phase: `prepare` sends the record SynthDef, allocates the
//! ring buffer and opens the file, then the dispatcher issues `/sync`. Only
//! once the engine answers does `begin` create the DiskOut synth, so capture
//! never starts against an unready file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use scbridge_types::RecordingStatus;

use crate::config::RecordingSettings;
use crate::engine::backend::{BackendError, EngineBackend};
use crate::engine::synthdef::{disk_record_def, disk_record_def_name};
use crate::engine::GROUP_RECORD;

pub const MAX_CHANNELS: u16 = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordingError {
    AlreadyActive(PathBuf),
    InvalidChannelCount(i64),
    Engine(BackendError),
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::AlreadyActive(path) => {
                write!(f, "already recording to {}", path.display())
            }
            RecordingError::InvalidChannelCount(n) => {
                write!(f, "channel count must be 1..={}, got {}", MAX_CHANNELS, n)
            }
            RecordingError::Engine(e) => write!(f, "engine error: {}", e),
        }
    }
}

impl std::error::Error for RecordingError {}

impl From<BackendError> for RecordingError {
    fn from(e: BackendError) -> Self {
        RecordingError::Engine(e)
    }
}

enum RecordingState {
    Inactive,
    Armed {
        path: PathBuf,
        channels: u16,
        sync_id: i32,
    },
    Recording {
        path: PathBuf,
        channels: u16,
        node_id: i32,
        started_at: Instant,
    },
}

pub struct RecordingController {
    settings: RecordingSettings,
    state: RecordingState,
    /// Buffers waiting for scsynth to flush before `/b_free`.
    pending_buffer_free: Vec<(i32, Instant)>,
}

/// Soundfile header for a target path, from its extension.
pub fn header_format_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("aif") | Some("aiff") => "aiff",
        Some("caf") => "caf",
        Some("w64") => "w64",
        Some("flac") => "flac",
        _ => "wav",
    }
}

impl RecordingController {
    pub fn new(settings: RecordingSettings) -> Self {
        Self {
            settings,
            state: RecordingState::Inactive,
            pending_buffer_free: Vec::new(),
        }
    }

    pub fn status(&self, now: Instant) -> RecordingStatus {
        match &self.state {
            RecordingState::Inactive => RecordingStatus::Inactive,
            RecordingState::Armed { path, channels, .. } => RecordingStatus::Armed {
                path: path.clone(),
                channels: *channels,
            },
            RecordingState::Recording {
                path,
                channels,
                started_at,
                ..
            } => RecordingStatus::Recording {
                path: path.clone(),
                channels: *channels,
                elapsed: now.saturating_duration_since(*started_at),
            },
        }
    }

    /// Validate a channel count coming off the wire.
    pub fn check_channels(channels: i64) -> Result<u16, RecordingError> {
        if (1..=MAX_CHANNELS as i64).contains(&channels) {
            Ok(channels as u16)
        } else {
            Err(RecordingError::InvalidChannelCount(channels))
        }
    }

    /// Phase one: get the engine ready to write `path`, then request sync `sync_id`.
    pub fn prepare(
        &mut self,
        backend: &dyn EngineBackend,
        path: &Path,
        channels: u16,
        sync_id: i32,
        now: Instant,
    ) -> Result<(), RecordingError> {
        match &self.state {
            RecordingState::Armed { path, .. } | RecordingState::Recording { path, .. } => {
                return Err(RecordingError::AlreadyActive(path.clone()));
            }
            RecordingState::Inactive => {}
        }

        let bufnum = self.settings.bufnum;
        backend.send_synthdef(&disk_record_def(channels))?;
        backend.alloc_buffer(bufnum, self.settings.buffer_frames, channels as i32)?;
        // The new /b_alloc replaced the buffer; a deferred free from the last session would hit it
        self.pending_buffer_free.retain(|(pending, _)| *pending != bufnum);

        let opened = backend
            .open_buffer_for_write(bufnum, path, header_format_for(path))
            .and_then(|()| backend.sync(sync_id));
        if let Err(e) = opened {
            self.release_buffer(backend, now);
            return Err(e.into());
        }

        log::info!(target: "recording", "armed {} ({} ch), waiting for sync {}", path.display(), channels, sync_id);
        self.state = RecordingState::Armed {
            path: path.to_path_buf(),
            channels,
            sync_id,
        };
        Ok(())
    }

    /// Phase two: the engine answered `sync_id`, start capturing.
    /// Returns `Ok(false)` if the recording was stopped while armed.
    pub fn begin(
        &mut self,
        backend: &dyn EngineBackend,
        sync_id: i32,
        node_id: i32,
        now: Instant,
    ) -> Result<bool, RecordingError> {
        let (path, channels) = match &self.state {
            RecordingState::Armed {
                path,
                channels,
                sync_id: armed,
            } if *armed == sync_id => (path.clone(), *channels),
            _ => {
                log::debug!(target: "recording", "sync {} no longer armed, not starting capture", sync_id);
                return Ok(false);
            }
        };

        let params = vec![
            ("bufnum".to_string(), self.settings.bufnum as f32),
            ("in".to_string(), self.settings.bus as f32),
        ];
        if let Err(e) = backend.create_synth(&disk_record_def_name(channels), node_id, GROUP_RECORD, &params) {
            self.release_buffer(backend, now);
            self.state = RecordingState::Inactive;
            return Err(e.into());
        }

        log::info!(target: "recording", "recording {} ({} ch, node {})", path.display(), channels, node_id);
        self.state = RecordingState::Recording {
            path,
            channels,
            node_id,
            started_at: now,
        };
        Ok(true)
    }

    /// The engine never answered the prepare sync; give the buffer back.
    pub fn abort_armed(&mut self, backend: &dyn EngineBackend, sync_id: i32, now: Instant) {
        if let RecordingState::Armed { path, sync_id: armed, .. } = &self.state {
            if *armed == sync_id {
                log::error!(target: "recording", "engine did not confirm recording prep for {}; abandoning", path.display());
                self.release_buffer(backend, now);
                self.state = RecordingState::Inactive;
            }
        }
    }

    /// Stop recording. Returns the finished file's path if capture had started.
    /// Stopping while armed cancels the pending capture; stopping while
    /// inactive does nothing.
    pub fn stop(&mut self, backend: &dyn EngineBackend, now: Instant) -> Result<Option<PathBuf>, RecordingError> {
        match std::mem::replace(&mut self.state, RecordingState::Inactive) {
            RecordingState::Inactive => {
                log::debug!(target: "recording", "stop requested but nothing is recording");
                Ok(None)
            }
            RecordingState::Armed { path, .. } => {
                log::info!(target: "recording", "cancelled armed recording to {}", path.display());
                self.release_buffer(backend, now);
                Ok(None)
            }
            RecordingState::Recording { path, node_id, started_at, .. } => {
                let freed = backend.free_node(node_id);
                self.release_buffer(backend, now);
                freed?;
                log::info!(
                    target: "recording",
                    "stopped {} after {:.1}s",
                    path.display(),
                    now.saturating_duration_since(started_at).as_secs_f32()
                );
                Ok(Some(path))
            }
        }
    }

    /// Free buffers whose flush delay has passed. Returns how many were freed.
    pub fn poll(&mut self, backend: &dyn EngineBackend, now: Instant) -> usize {
        let delay = self.settings.flush_delay;
        let before = self.pending_buffer_free.len();
        self.pending_buffer_free.retain(|(bufnum, when)| {
            if now.saturating_duration_since(*when) >= delay {
                if let Err(e) = backend.free_buffer(*bufnum) {
                    log::warn!(target: "recording", "could not free buffer {}: {}", bufnum, e);
                }
                false
            } else {
                true
            }
        });
        before - self.pending_buffer_free.len()
    }

    pub fn flush_delay(&self) -> Duration {
        self.settings.flush_delay
    }

    fn release_buffer(&mut self, backend: &dyn EngineBackend, now: Instant) {
        let bufnum = self.settings.bufnum;
        if let Err(e) = backend.close_buffer(bufnum) {
            log::warn!(target: "recording", "could not close buffer {}: {}", bufnum, e);
        }
        // Free after scsynth has flushed the file
        self.pending_buffer_free.push((bufnum, now));
    }
}
