//! # scbridge-types
//!
//! Shared type definitions for the scbridge workspace: note identifiers,
//! instrument definitions and the policies that govern the voice table.
//! Kept free of OSC and I/O so the types can be used by any front end.

mod instrument;
mod policy;
mod recording;

pub use instrument::{
    DefinitionError, InstrumentDef, ParamSpec, FREQ, GATE, MANDATORY_PARAMS, VOLUME,
};
pub use policy::{ReleasePolicy, UnknownNotePolicy};
pub use recording::RecordingStatus;

use serde::{Deserialize, Serialize};

/// Identifier for a sounding note, chosen by the sender.
///
/// Senders are free to use integers or string tokens. Integral floats are
/// normalized to `Int` before they reach the voice table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoteId {
    Int(i64),
    Token(String),
}

impl NoteId {
    /// Build an id from a float, keeping whole numbers as integers.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            NoteId::Int(value as i64)
        } else {
            NoteId::Token(value.to_string())
        }
    }
}

impl From<i64> for NoteId {
    fn from(id: i64) -> Self {
        NoteId::Int(id)
    }
}

impl From<i32> for NoteId {
    fn from(id: i32) -> Self {
        NoteId::Int(id as i64)
    }
}

impl From<&str> for NoteId {
    fn from(token: &str) -> Self {
        NoteId::Token(token.to_string())
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoteId::Int(id) => write!(f, "{}", id),
            NoteId::Token(token) => write!(f, "\"{}\"", token),
        }
    }
}
