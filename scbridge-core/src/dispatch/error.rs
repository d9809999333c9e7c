use std::fmt;

use scbridge_types::{DefinitionError, NoteId};

use crate::engine::BackendError;
use crate::recording::RecordingError;
use crate::voices::NoteIdInUse;

/// Why a single inbound message could not be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    UnknownRoute(String),
    BadArguments { address: String, reason: String },
    UnknownNote { instrument: String, id: NoteId },
    NoteIdInUse(NoteIdInUse),
    Definition(DefinitionError),
    Recording(RecordingError),
    Engine(BackendError),
}

impl DispatchError {
    pub(crate) fn bad_args(address: &str, reason: impl Into<String>) -> Self {
        DispatchError::BadArguments {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownRoute(addr) => write!(f, "no handler for {}", addr),
            DispatchError::BadArguments { address, reason } => {
                write!(f, "bad arguments for {}: {}", address, reason)
            }
            DispatchError::UnknownNote { instrument, id } => {
                write!(f, "{}: no voice for note {}", instrument, id)
            }
            DispatchError::NoteIdInUse(e) if e.released => write!(
                f,
                "note {} is still in the voice table (released, not yet pruned)",
                e.id
            ),
            DispatchError::NoteIdInUse(e) => write!(f, "note {} is already sounding", e.id),
            DispatchError::Definition(e) => write!(f, "{}", e),
            DispatchError::Recording(e) => write!(f, "recording: {}", e),
            DispatchError::Engine(e) => write!(f, "engine: {}", e),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Definition(e) => Some(e),
            DispatchError::Recording(e) => Some(e),
            DispatchError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DefinitionError> for DispatchError {
    fn from(e: DefinitionError) -> Self {
        DispatchError::Definition(e)
    }
}

impl From<RecordingError> for DispatchError {
    fn from(e: RecordingError) -> Self {
        DispatchError::Recording(e)
    }
}

impl From<BackendError> for DispatchError {
    fn from(e: BackendError) -> Self {
        DispatchError::Engine(e)
    }
}

impl From<NoteIdInUse> for DispatchError {
    fn from(e: NoteIdInUse) -> Self {
        DispatchError::NoteIdInUse(e)
    }
}
