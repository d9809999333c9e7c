use std::path::PathBuf;
use std::time::Duration;

/// Externally visible state of the disk recorder.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RecordingStatus {
    #[default]
    Inactive,
    /// Buffer prepared, waiting for the engine to confirm before capture starts.
    Armed { path: PathBuf, channels: u16 },
    Recording {
        path: PathBuf,
        channels: u16,
        elapsed: Duration,
    },
}

impl RecordingStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, RecordingStatus::Inactive)
    }
}
