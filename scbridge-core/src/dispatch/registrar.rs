//! Builds the declarative `(channel, route)` lists the handler table is made from.

use scbridge_types::{DefinitionError, InstrumentDef};

use super::routes::Route;

pub const RECORDING_START: &str = "/recording/start";
pub const RECORDING_STOP: &str = "/recording/stop";
pub const QUIT: &str = "/quit";

/// `<prefix>/<instrument>/<event>`
pub fn channel(prefix: &str, instrument: &str, event: &str) -> String {
    format!("{}/{}/{}", prefix, instrument, event)
}

/// Routes for one instrument: `start_note`, one update route per mandatory
/// parameter and one `change_parameter/<name>` per optional parameter.
///
/// Nothing is returned for an invalid definition, so a failed registration
/// installs zero routes.
pub fn instrument_routes(
    prefix: &str,
    def: &InstrumentDef,
) -> Result<Vec<(String, Route)>, DefinitionError> {
    def.validate()?;

    let name = &def.name;
    let mut routes = vec![
        (channel(prefix, name, "start_note"), Route::StartNote(name.clone())),
        (channel(prefix, name, "end_note"), Route::EndNote(name.clone())),
        (channel(prefix, name, "change_pitch"), Route::ChangePitch(name.clone())),
        (channel(prefix, name, "change_volume"), Route::ChangeVolume(name.clone())),
    ];
    for param in def.optional_params() {
        routes.push((
            channel(prefix, name, &format!("change_parameter/{}", param.name)),
            Route::ChangeParameter {
                instrument: name.clone(),
                param: param.name.clone(),
            },
        ));
    }
    Ok(routes)
}

/// Routes that exist regardless of instruments.
pub fn global_routes(compile_address: &str) -> Vec<(String, Route)> {
    vec![
        (compile_address.to_string(), Route::Compile),
        (RECORDING_START.to_string(), Route::RecordingStart),
        (RECORDING_STOP.to_string(), Route::RecordingStop),
        (QUIT.to_string(), Route::Quit),
    ]
}
