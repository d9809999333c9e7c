//! Address → route table.

use std::collections::HashMap;

use scbridge_types::{FREQ, GATE, VOLUME};

/// What an inbound address means to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    StartNote(String),
    EndNote(String),
    ChangePitch(String),
    ChangeVolume(String),
    ChangeParameter { instrument: String, param: String },
    Compile,
    RecordingStart,
    RecordingStop,
    Quit,
}

impl Route {
    /// Instrument the route belongs to, `None` for global routes.
    pub fn instrument(&self) -> Option<&str> {
        match self {
            Route::StartNote(name)
            | Route::EndNote(name)
            | Route::ChangePitch(name)
            | Route::ChangeVolume(name) => Some(name),
            Route::ChangeParameter { instrument, .. } => Some(instrument),
            Route::Compile | Route::RecordingStart | Route::RecordingStop | Route::Quit => None,
        }
    }

    /// The voice control this route writes, for update routes.
    pub fn updates_param(&self) -> Option<&str> {
        match self {
            Route::EndNote(_) => Some(GATE),
            Route::ChangePitch(_) => Some(FREQ),
            Route::ChangeVolume(_) => Some(VOLUME),
            Route::ChangeParameter { param, .. } => Some(param),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct HandlerTable {
    routes: HashMap<String, Route>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `(channel, route)` pairs. An existing route on the same
    /// channel is replaced, never duplicated.
    pub fn install(&mut self, routes: Vec<(String, Route)>) {
        for (channel, route) in routes {
            if let Some(previous) = self.routes.insert(channel.clone(), route) {
                log::trace!(target: "dispatch", "replaced route {} ({:?})", channel, previous);
            }
        }
    }

    /// Drop every route belonging to `instrument`. Returns how many went.
    pub fn remove_instrument(&mut self, instrument: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| route.instrument() != Some(instrument));
        before - self.routes.len()
    }

    pub fn resolve(&self, address: &str) -> Option<&Route> {
        self.routes.get(address)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn count_for(&self, instrument: &str) -> usize {
        self.routes
            .values()
            .filter(|route| route.instrument() == Some(instrument))
            .count()
    }

    /// Channels currently bound, sorted.
    pub fn channels(&self) -> Vec<&str> {
        let mut channels: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        channels.sort_unstable();
        channels
    }
}
