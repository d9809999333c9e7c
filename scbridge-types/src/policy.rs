use std::time::Duration;

/// What happens to a voice table entry once its note has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Keep the entry indefinitely after `end_note`.
    Retain,
    /// Drop the entry as soon as the gate closes.
    Remove,
    /// Keep the entry for the release tail, then prune it.
    Linger(Duration),
}

impl Default for ReleasePolicy {
    fn default() -> Self {
        ReleasePolicy::Linger(Duration::from_secs(5))
    }
}

/// How messages naming a note that is not in the voice table are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownNotePolicy {
    /// Surface the lookup failure as an error.
    Strict,
    /// Drop the message, logging at debug level only.
    Ignore,
}

impl UnknownNotePolicy {
    /// Strict in debug builds, lenient in release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            UnknownNotePolicy::Strict
        } else {
            UnknownNotePolicy::Ignore
        }
    }
}

impl Default for UnknownNotePolicy {
    fn default() -> Self {
        Self::for_build()
    }
}
