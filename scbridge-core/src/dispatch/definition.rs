//! Parsing of serialized instrument definitions sent on the compile channel.
//!
//! Three shapes are understood:
//!
//! - JSON: `{"name": "pluck", "params": [{"name": "cutoff", "default": 2000}]}`
//! - a SuperCollider SynthDef source, whose name and argument list are read
//!   from the header: `SynthDef(\pluck, { |freq=440, volume=0.5, gate=1| ... })`
//! - a bare def name (`pluck` or `\pluck`) for a def the engine already has.

use std::collections::HashMap;

use regex::Regex;
use scbridge_types::{DefinitionError, InstrumentDef, ParamSpec};

pub fn parse_definition(
    text: &str,
    known: &HashMap<String, InstrumentDef>,
) -> Result<InstrumentDef, DefinitionError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DefinitionError::Unparsable("empty definition".to_string()));
    }

    if text.starts_with('{') {
        return serde_json::from_str(text)
            .map_err(|e| DefinitionError::Unparsable(format!("invalid JSON definition: {}", e)));
    }

    if text.contains("SynthDef") {
        return parse_synthdef_source(text);
    }

    let name = text.strip_prefix('\\').unwrap_or(text);
    if name.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(DefinitionError::Unparsable(format!(
            "'{}' is neither JSON, SynthDef source nor a def name",
            text
        )));
    }
    Ok(match known.get(name) {
        Some(def) => def.clone(),
        None => {
            log::debug!(target: "dispatch", "no parameter schema known for '{}', assuming freq/volume/gate", name);
            InstrumentDef::with_mandatory(name)
        }
    })
}

fn parse_synthdef_source(text: &str) -> Result<InstrumentDef, DefinitionError> {
    let name_re = Regex::new(r#"SynthDef\s*\(\s*(?:\\([\w.\-]+)|["']([^"']+)["'])"#)
        .map_err(|e| DefinitionError::Unparsable(e.to_string()))?;
    let pipe_args_re = Regex::new(r"\{\s*\|([^|]*)\|")
        .map_err(|e| DefinitionError::Unparsable(e.to_string()))?;
    let arg_keyword_re = Regex::new(r"\{\s*arg\s+([^;]*);")
        .map_err(|e| DefinitionError::Unparsable(e.to_string()))?;

    let caps = name_re
        .captures(text)
        .ok_or_else(|| DefinitionError::Unparsable("no SynthDef name found".to_string()))?;
    let name = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DefinitionError::Unparsable("no SynthDef name found".to_string()))?;

    let arg_list = pipe_args_re
        .captures(text)
        .or_else(|| arg_keyword_re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("");

    let params = split_top_level(arg_list)
        .into_iter()
        .filter(|arg| !arg.is_empty())
        .map(|arg| parse_arg(&name, arg))
        .collect();

    Ok(InstrumentDef::new(&name, params))
}

/// `freq=440`, `freq = 440`, `amp(0.1)` or a bare `gate`.
fn parse_arg(instrument: &str, arg: &str) -> ParamSpec {
    let (name, default) = match arg.find(['=', '(']) {
        Some(pos) => (
            arg[..pos].trim(),
            arg[pos + 1..].trim().trim_end_matches(')').trim(),
        ),
        None => (arg.trim(), ""),
    };
    let value = if default.is_empty() {
        0.0
    } else {
        default.parse::<f32>().unwrap_or_else(|_| {
            log::debug!(target: "dispatch", "{}: non-literal default for '{}' ({}), using 0", instrument, name, default);
            0.0
        })
    };
    ParamSpec::new(name, value)
}

/// Split on commas that are not nested inside brackets, so array defaults
/// like `amps=[0.2, 0.1]` stay in one piece.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(list[start..].trim());
    parts
}
