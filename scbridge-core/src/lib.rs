//! # scbridge-core
//!
//! Note-lifecycle bridge between an OSC controller (a composition program)
//! and a SuperCollider synthesis server. Inbound note, parameter, compile,
//! recording and quit messages are routed to live synth nodes; nothing here
//! depends on a particular front end.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scbridge_core::bridge::Bridge;
//! use scbridge_core::config::Config;
//!
//! // 1. Embedded defaults merged with ~/.config/scbridge/config.toml
//! let config = Config::load();
//!
//! // 2. Bind the controller socket, connect to scsynth, register instruments
//! let mut bridge = Bridge::connect(&config)?;
//!
//! // 3. Announce the port to the coordinator and dispatch until /quit
//! bridge.run()?;
//! ```
//!
//! ## Module Overview
//!
//! - [`bridge`]: sockets, receive threads and the dispatch loop
//! - [`dispatch`]: `Dispatcher`: handler table, note handlers, compile and
//!   recording routes, sync continuations
//! - [`voices`]: voice table keyed by note id, release policy
//! - [`recording`]: two-phase disk recording controller
//! - [`engine`]: `EngineBackend` trait, scsynth OSC client, sync tracker,
//!   SynthDef encoder, optional scsynth process
//! - [`config`]: TOML configuration (embedded defaults + user overrides)

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod recording;
pub mod voices;

pub use scbridge_types as types;
