//! Typed access to OSC message arguments.
//!
//! Senders are loose about numeric types (floats for ids, doubles from some
//! clients), so every numeric accessor accepts any OSC number.

use rosc::OscType;
use scbridge_types::NoteId;

pub fn note_id(args: &[OscType], index: usize) -> Result<NoteId, String> {
    match args.get(index) {
        Some(OscType::Int(v)) => Ok(NoteId::Int(*v as i64)),
        Some(OscType::Long(v)) => Ok(NoteId::Int(*v)),
        Some(OscType::Float(v)) => Ok(NoteId::from_f64(*v as f64)),
        Some(OscType::Double(v)) => Ok(NoteId::from_f64(*v)),
        Some(OscType::String(s)) => Ok(NoteId::Token(s.clone())),
        Some(other) => Err(format!("argument {} is not a note id: {:?}", index, other)),
        None => Err(format!("missing note id at argument {}", index)),
    }
}

pub fn number(args: &[OscType], index: usize) -> Result<f32, String> {
    match args.get(index) {
        Some(OscType::Int(v)) => Ok(*v as f32),
        Some(OscType::Long(v)) => Ok(*v as f32),
        Some(OscType::Float(v)) => Ok(*v),
        Some(OscType::Double(v)) => Ok(*v as f32),
        Some(other) => Err(format!("argument {} is not a number: {:?}", index, other)),
        None => Err(format!("missing number at argument {}", index)),
    }
}

/// Integer argument; floats are accepted only when whole.
pub fn integer(args: &[OscType], index: usize) -> Result<i64, String> {
    match args.get(index) {
        Some(OscType::Int(v)) => Ok(*v as i64),
        Some(OscType::Long(v)) => Ok(*v),
        Some(OscType::Float(v)) if v.fract() == 0.0 => Ok(*v as i64),
        Some(OscType::Double(v)) if v.fract() == 0.0 => Ok(*v as i64),
        Some(other) => Err(format!("argument {} is not an integer: {:?}", index, other)),
        None => Err(format!("missing integer at argument {}", index)),
    }
}

pub fn string(args: &[OscType], index: usize) -> Result<&str, String> {
    match args.get(index) {
        Some(OscType::String(s)) => Ok(s),
        Some(other) => Err(format!("argument {} is not a string: {:?}", index, other)),
        None => Err(format!("missing string at argument {}", index)),
    }
}

/// Blob at `index`, if present.
pub fn blob(args: &[OscType], index: usize) -> Option<&[u8]> {
    match args.get(index) {
        Some(OscType::Blob(bytes)) => Some(bytes),
        _ => None,
    }
}
