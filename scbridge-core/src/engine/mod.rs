pub mod backend;
pub mod osc_client;
pub mod server;
pub mod sync;
pub mod synthdef;

pub use backend::{BackendError, BackendResult, EngineBackend, ScBackend};
pub use osc_client::OscClient;
pub use server::EngineProcess;
pub use sync::SyncTracker;

// Server group IDs for execution ordering: voices run before the recorder.
pub const GROUP_VOICES: i32 = 100;
pub const GROUP_RECORD: i32 = 400;

/// Root node present on every scsynth.
pub const ROOT_NODE: i32 = 0;
