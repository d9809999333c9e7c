//! Voice table: which synth node is sounding each note.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use scbridge_types::{NoteId, ReleasePolicy, FREQ, GATE, VOLUME};

/// MIDI pitch (possibly fractional) to Hz.
pub fn mtof(pitch: f32, tuning_a4: f32) -> f32 {
    tuning_a4 * 2.0_f32.powf((pitch - 69.0) / 12.0)
}

/// A live synth node created for one note.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceHandle {
    pub instrument: String,
    pub node_id: i32,
    /// Last value sent for each control, mandatory ones included.
    pub params: BTreeMap<String, f32>,
    pub started_at: Instant,
    /// Set when the gate closed.
    pub released_at: Option<Instant>,
}

impl VoiceHandle {
    pub fn new(instrument: &str, node_id: i32, started_at: Instant) -> Self {
        Self {
            instrument: instrument.to_string(),
            node_id,
            params: BTreeMap::new(),
            started_at,
            released_at: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<f32> {
        self.params.get(name).copied()
    }

    pub fn freq(&self) -> Option<f32> {
        self.param(FREQ)
    }

    pub fn volume(&self) -> Option<f32> {
        self.param(VOLUME)
    }

    pub fn gate(&self) -> Option<f32> {
        self.param(GATE)
    }

    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }
}

/// Rejected attempt to reuse a note id that still has an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteIdInUse {
    pub id: NoteId,
    /// The existing entry's gate is already closed (retained after end_note).
    pub released: bool,
}

pub struct VoiceTable {
    voices: HashMap<NoteId, VoiceHandle>,
    policy: ReleasePolicy,
}

impl VoiceTable {
    pub fn new(policy: ReleasePolicy) -> Self {
        Self {
            voices: HashMap::new(),
            policy,
        }
    }

    pub fn insert(&mut self, id: NoteId, voice: VoiceHandle) -> Result<(), NoteIdInUse> {
        if let Some(existing) = self.voices.get(&id) {
            return Err(NoteIdInUse {
                released: existing.is_released(),
                id,
            });
        }
        self.voices.insert(id, voice);
        Ok(())
    }

    pub fn get(&self, id: &NoteId) -> Option<&VoiceHandle> {
        self.voices.get(id)
    }

    /// Voice for `id` only if it belongs to `instrument`.
    pub fn get_for_mut(&mut self, instrument: &str, id: &NoteId) -> Option<&mut VoiceHandle> {
        self.voices
            .get_mut(id)
            .filter(|voice| voice.instrument == instrument)
    }

    pub fn contains(&self, id: &NoteId) -> bool {
        self.voices.contains_key(id)
    }

    /// Record that the gate closed; applies the release policy.
    /// Returns the released voice's node id.
    pub fn release(&mut self, id: &NoteId, now: Instant) -> Option<i32> {
        match self.policy {
            ReleasePolicy::Remove => self.voices.remove(id).map(|v| v.node_id),
            ReleasePolicy::Retain | ReleasePolicy::Linger(_) => {
                let voice = self.voices.get_mut(id)?;
                voice.params.insert(GATE.to_string(), 0.0);
                if voice.released_at.is_none() {
                    voice.released_at = Some(now);
                }
                Some(voice.node_id)
            }
        }
    }

    /// Drop released entries whose release tail is over. Only `Linger` prunes.
    pub fn prune(&mut self, now: Instant) -> Vec<(NoteId, VoiceHandle)> {
        let ReleasePolicy::Linger(tail) = self.policy else {
            return Vec::new();
        };
        let expired: Vec<NoteId> = self
            .voices
            .iter()
            .filter(|(_, v)| {
                v.released_at
                    .map(|at| now.saturating_duration_since(at) >= tail)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.voices.remove(&id).map(|v| (id, v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
