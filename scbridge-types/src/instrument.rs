//! Instrument definitions: a SynthDef name plus its parameter schema.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const FREQ: &str = "freq";
pub const VOLUME: &str = "volume";
pub const GATE: &str = "gate";

/// Parameters every playable instrument must expose.
pub const MANDATORY_PARAMS: [&str; 3] = [FREQ, VOLUME, GATE];

/// A single named SynthDef control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub default: f32,
}

impl ParamSpec {
    pub fn new(name: &str, default: f32) -> Self {
        Self {
            name: name.to_string(),
            default,
        }
    }
}

/// A named parameter schema used to create voices of one timbre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDef {
    /// SynthDef name on the server; also the middle segment of the note channels.
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Compiled `.scsyndef` to load with `/d_load` when the definition is compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthdef_path: Option<PathBuf>,
}

impl InstrumentDef {
    pub fn new(name: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.to_string(),
            params,
            synthdef_path: None,
        }
    }

    /// Definition exposing only `freq`, `volume` and `gate`.
    pub fn with_mandatory(name: &str) -> Self {
        Self::new(
            name,
            vec![
                ParamSpec::new(FREQ, 440.0),
                ParamSpec::new(VOLUME, 0.5),
                ParamSpec::new(GATE, 1.0),
            ],
        )
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn default_of(&self, name: &str) -> Option<f32> {
        self.params.iter().find(|p| p.name == name).map(|p| p.default)
    }

    /// Mandatory parameters this definition lacks, in canonical order.
    pub fn missing_params(&self) -> Vec<&'static str> {
        MANDATORY_PARAMS
            .iter()
            .copied()
            .filter(|name| !self.has_param(name))
            .collect()
    }

    /// Parameters beyond the mandatory three, in declaration order.
    pub fn optional_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params
            .iter()
            .filter(|p| !MANDATORY_PARAMS.contains(&p.name.as_str()))
    }

    /// Check that the definition can safely accept note events.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !is_valid_identifier(&self.name) {
            return Err(DefinitionError::InvalidName(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for param in &self.params {
            if !is_valid_identifier(&param.name) {
                return Err(DefinitionError::InvalidParamName {
                    instrument: self.name.clone(),
                    param: param.name.clone(),
                });
            }
            if !seen.insert(param.name.as_str()) {
                return Err(DefinitionError::DuplicateParam {
                    instrument: self.name.clone(),
                    param: param.name.clone(),
                });
            }
        }
        let missing = self.missing_params();
        if !missing.is_empty() {
            return Err(DefinitionError::MissingParams {
                instrument: self.name.clone(),
                missing: missing.into_iter().map(String::from).collect(),
            });
        }
        Ok(())
    }
}

/// Names end up inside OSC addresses, so no separators or whitespace.
fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Why an instrument definition was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionError {
    MissingParams {
        instrument: String,
        missing: Vec<String>,
    },
    InvalidName(String),
    InvalidParamName {
        instrument: String,
        param: String,
    },
    DuplicateParam {
        instrument: String,
        param: String,
    },
    Unparsable(String),
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionError::MissingParams { instrument, missing } => write!(
                f,
                "instrument '{}' is missing mandatory parameter(s): {}",
                instrument,
                missing.join(", ")
            ),
            DefinitionError::InvalidName(name) => write!(f, "invalid instrument name '{}'", name),
            DefinitionError::InvalidParamName { instrument, param } => {
                write!(f, "instrument '{}' has invalid parameter name '{}'", instrument, param)
            }
            DefinitionError::DuplicateParam { instrument, param } => {
                write!(f, "instrument '{}' declares parameter '{}' twice", instrument, param)
            }
            DefinitionError::Unparsable(reason) => {
                write!(f, "could not parse instrument definition: {}", reason)
            }
        }
    }
}

impl std::error::Error for DefinitionError {}
