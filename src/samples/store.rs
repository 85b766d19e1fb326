// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Sample storage. Samples are held entirely in memory for the life of the store.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::output::PcmBuffer;

/// Global sound ID counter. 0 is reserved for the invalid sound.
static NEXT_SOUND_ID: AtomicU32 = AtomicU32::new(1);

/// Takes the next id from the counter, skipping 0 when the counter wraps.
fn next_id(counter: &AtomicU32) -> u32 {
    loop {
        let id = counter.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// A handle to a loaded sample. Carries no ownership; copying it is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sound {
    id: u32,
    slot: usize,
}

impl Sound {
    /// The sound that never plays.
    pub const INVALID: Sound = Sound { id: 0, slot: 0 };

    pub(crate) fn new(id: u32, slot: usize) -> Sound {
        Sound { id, slot }
    }

    /// Returns the unique, non-zero id of this sound (0 for [`Sound::INVALID`]).
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the store slot this sound refers to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Returns false for the invalid sound.
    pub fn is_valid(&self) -> bool {
        self.id != 0
    }
}

impl Default for Sound {
    fn default() -> Self {
        Sound::INVALID
    }
}

/// A decoded sample owned by the store.
pub struct SampleEntry {
    /// The id of the sound this entry was loaded as.
    id: u32,
    /// PCM bytes, shared with any channel currently playing them.
    data: PcmBuffer,
}

impl SampleEntry {
    /// Returns the PCM data.
    pub fn data(&self) -> &PcmBuffer {
        &self.data
    }

    /// Returns the length of the PCM data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if there's no PCM data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Owns every loaded sample and hands out `Sound` handles for them.
#[derive(Default)]
pub struct SampleStore {
    entries: Vec<SampleEntry>,
}

impl SampleStore {
    /// Creates a new, empty store.
    pub fn new() -> SampleStore {
        SampleStore {
            entries: Vec::new(),
        }
    }

    /// Takes ownership of a decoded PCM buffer and returns a fresh handle for it.
    pub fn load(&mut self, data: Vec<u8>) -> Sound {
        let id = next_id(&NEXT_SOUND_ID);
        let slot = self.entries.len();
        let bytes = data.len();
        self.entries.push(SampleEntry {
            id,
            data: data.into(),
        });

        debug!(id, slot, bytes, "Sample loaded");
        Sound::new(id, slot)
    }

    /// Looks up the entry for a sound. Returns None for out of range slots and for
    /// handles issued before the last `clear`.
    pub fn resolve(&self, sound: Sound) -> Option<&SampleEntry> {
        self.entries
            .get(sound.slot)
            .filter(|entry| entry.id == sound.id)
    }

    /// Releases every sample. All previously issued handles stop resolving.
    pub fn clear(&mut self) {
        debug!(samples = self.entries.len(), "Clearing sample store");
        self.entries.clear();
    }

    /// Returns the number of stored samples.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total memory used by stored samples.
    pub fn memory_size(&self) -> usize {
        self.entries.iter().map(|entry| entry.len()).sum()
    }
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStore")
            .field("samples", &self.entries.len())
            .field("memory_kb", &(self.memory_size() / 1024))
            .finish()
    }
}
