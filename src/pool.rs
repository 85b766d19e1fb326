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

//! A fixed pool of playback channels for short, pre-decoded sounds.
//!
//! Each `play` request picks a free channel, or preempts the lowest priority busy
//! channel when the request outranks it, or is rejected. Channels report buffer
//! completions back through a callback so the pool can loop or release them.

mod channel;
mod error;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::decoder::DecodedAudio;
use crate::output::{CompletionCallback, OutputError, OutputProvider, PcmFormat, VolumeRange};
use crate::samples::{self, SampleStore, Sound};

use channel::{Channel, CompletionOutcome};
pub use channel::{ChannelSnapshot, ChannelState, FREE_PRIORITY};
pub use error::PoolError;

/// The default number of channels.
pub const DEFAULT_CHANNELS: usize = 16;

/// Pool construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// The number of channels to create.
    pub channels: usize,
    /// The PCM format every channel is created for.
    pub format: PcmFormat,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            channels: DEFAULT_CHANNELS,
            format: PcmFormat::default(),
        }
    }
}

/// The channel a play request lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Free(usize),
    Preempt(usize),
    Reject,
}

/// Picks a channel for a request of the given priority. The first free channel wins.
/// Otherwise the lowest priority busy channel (lowest index on ties) is preempted if the
/// request strictly outranks it.
fn select(channels: &[Channel], priority: i32) -> Selection {
    let mut lowest: Option<(usize, i32)> = None;
    for (index, channel) in channels.iter().enumerate() {
        if channel.is_free() {
            return Selection::Free(index);
        }
        if lowest.map_or(true, |(_, lowest_priority)| channel.priority() < lowest_priority) {
            lowest = Some((index, channel.priority()));
        }
    }

    match lowest {
        Some((index, lowest_priority)) if lowest_priority < priority => Selection::Preempt(index),
        _ => Selection::Reject,
    }
}

/// Routes a completion to its channel. Completions for a pool that's gone, or for a
/// channel that isn't in the table, are dropped.
fn handle_completion(channels: &Weak<Mutex<Vec<Channel>>>, index: usize, generation: u64) {
    let Some(channels) = channels.upgrade() else {
        return;
    };
    let mut channels = channels.lock();
    let Some(channel) = channels.get_mut(index) else {
        return;
    };

    let sound_id = channel.playing_sound_id();
    match channel.on_complete(generation) {
        CompletionOutcome::Ignored => {
            trace!(channel = index, generation, "Ignoring stale completion")
        }
        CompletionOutcome::Looped => trace!(channel = index, sound_id, "Looping sound"),
        CompletionOutcome::Freed => debug!(channel = index, sound_id, "Channel finished"),
    }
}

/// A pool of playback channels plus the samples they play.
pub struct SoundPool {
    store: RwLock<SampleStore>,
    channels: Arc<Mutex<Vec<Channel>>>,
    max_channels: usize,
    volume_range: VolumeRange,
    format: PcmFormat,
}

impl SoundPool {
    /// Creates a pool on an initialized output. If the output runs out of channels part
    /// way through, the pool keeps the ones it got.
    pub fn new(output: &dyn OutputProvider, options: PoolOptions) -> Result<SoundPool, PoolError> {
        if options.channels == 0 {
            return Err(PoolError::NoChannelsRequested);
        }
        if !output.is_initialized() {
            return Err(PoolError::OutputNotInitialized);
        }

        let channels = Arc::new(Mutex::new(Vec::with_capacity(options.channels)));
        for index in 0..options.channels {
            let weak = Arc::downgrade(&channels);
            let on_complete: CompletionCallback =
                Box::new(move |generation| handle_completion(&weak, index, generation));

            // The channel lock isn't held while the output creates the resource.
            match output.create_channel(options.format, on_complete) {
                Ok(resource) => channels.lock().push(Channel::new(index, resource)),
                Err(e) => {
                    warn!(
                        requested = options.channels,
                        created = index,
                        err = %e,
                        "Unable to create all requested channels"
                    );
                    break;
                }
            }
        }

        let max_channels = channels.lock().len();
        if max_channels == 0 {
            return Err(PoolError::NoChannelsCreated);
        }

        let volume_range = output.volume_range();
        info!(
            channels = max_channels,
            format = %options.format,
            min_millibel = volume_range.min,
            max_millibel = volume_range.max,
            "Sound pool initialized"
        );

        Ok(SoundPool {
            store: RwLock::new(SampleStore::new()),
            channels,
            max_channels,
            volume_range,
            format: options.format,
        })
    }

    /// Plays a sound. `volume` is normalized to [0.0, 1.0]. Returns the channel the sound
    /// is playing on, or None if the sound is invalid or no channel could be had.
    pub fn play(
        &self,
        sound: Sound,
        volume: f32,
        looped: bool,
        priority: i32,
    ) -> Result<Option<usize>, PoolError> {
        if !sound.is_valid() {
            return Ok(None);
        }

        let buffer = match self.store.read().resolve(sound) {
            Some(entry) => entry.data().clone(),
            None => {
                debug!(sound_id = sound.id(), slot = sound.slot(), "Sound does not resolve");
                return Ok(None);
            }
        };

        let mut channels = self.channels.lock();
        let index = match select(&channels, priority) {
            Selection::Free(index) => index,
            Selection::Preempt(index) => {
                let channel = &mut channels[index];
                debug!(
                    channel = index,
                    preempted_sound_id = channel.playing_sound_id(),
                    preempted_priority = channel.priority(),
                    sound_id = sound.id(),
                    priority,
                    "Preempting channel"
                );
                if let Err(e) = channel.halt() {
                    warn!(channel = index, err = %e, "Unable to stop preempted channel");
                }
                index
            }
            Selection::Reject => {
                debug!(sound_id = sound.id(), priority, "No channel available");
                return Ok(None);
            }
        };

        let level = self.volume_range.level(volume);
        channels[index].start(sound.id(), buffer, level, looped, priority)?;
        debug!(channel = index, sound_id = sound.id(), priority, looped, "Playing sound");
        Ok(Some(index))
    }

    /// Pauses every channel playing the given sound.
    pub fn pause(&self, sound: Sound) -> Result<(), PoolError> {
        self.for_each_playing(sound, Channel::pause)
    }

    /// Resumes every channel playing the given sound.
    pub fn resume(&self, sound: Sound) -> Result<(), PoolError> {
        self.for_each_playing(sound, Channel::resume)
    }

    /// Stops every channel playing the given sound and frees them.
    pub fn stop(&self, sound: Sound) -> Result<(), PoolError> {
        self.for_each_playing(sound, Channel::halt)
    }

    /// Pauses every busy channel.
    pub fn pause_all(&self) -> Result<(), PoolError> {
        self.for_each_busy(Channel::pause)
    }

    /// Resumes every busy channel.
    pub fn resume_all(&self) -> Result<(), PoolError> {
        self.for_each_busy(Channel::resume)
    }

    /// Stops every busy channel. All channels are free afterwards.
    pub fn stop_all(&self) -> Result<(), PoolError> {
        self.for_each_busy(Channel::halt)
    }

    fn for_each_playing<F>(&self, sound: Sound, op: F) -> Result<(), PoolError>
    where
        F: Fn(&mut Channel) -> Result<(), OutputError>,
    {
        if !sound.is_valid() {
            return Ok(());
        }
        self.apply(|channel| channel.playing_sound_id() == sound.id(), op)
    }

    fn for_each_busy<F>(&self, op: F) -> Result<(), PoolError>
    where
        F: Fn(&mut Channel) -> Result<(), OutputError>,
    {
        self.apply(|channel| !channel.is_free(), op)
    }

    /// Applies an operation to every matching channel, returning the first error.
    fn apply<P, F>(&self, matches: P, op: F) -> Result<(), PoolError>
    where
        P: Fn(&Channel) -> bool,
        F: Fn(&mut Channel) -> Result<(), OutputError>,
    {
        let mut channels = self.channels.lock();
        let mut first_error = None;
        for (index, channel) in channels.iter_mut().enumerate() {
            if !matches(channel) {
                continue;
            }
            if let Err(e) = op(channel) {
                warn!(channel = index, err = %e, "Channel operation failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Stores already decoded PCM in the pool format and returns its handle.
    pub fn load(&self, pcm: Vec<u8>) -> Sound {
        self.store.write().load(pcm)
    }

    /// Converts decoder output to the pool format and stores it.
    pub fn load_decoded(&self, decoded: DecodedAudio) -> Result<Sound, PoolError> {
        if decoded.is_empty() {
            return Err(PoolError::EmptySample);
        }
        let pcm = samples::conform(decoded, self.format);
        if pcm.is_empty() {
            return Err(PoolError::EmptySample);
        }
        Ok(self.load(pcm))
    }

    /// Drops every stored sample. Sounds that are playing finish normally.
    pub fn unload_all(&self) {
        self.store.write().clear();
    }

    /// Returns the number of stored samples.
    pub fn sample_count(&self) -> usize {
        self.store.read().len()
    }

    /// Returns the memory used by stored samples.
    pub fn memory_size(&self) -> usize {
        self.store.read().memory_size()
    }

    /// Returns the number of channels in the pool.
    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Returns a snapshot of every channel.
    pub fn channels(&self) -> Vec<ChannelSnapshot> {
        self.channels.lock().iter().map(Channel::snapshot).collect()
    }

    /// Returns a snapshot of a single channel.
    pub fn channel(&self, index: usize) -> Option<ChannelSnapshot> {
        self.channels.lock().get(index).map(Channel::snapshot)
    }

    /// Returns the number of busy channels.
    pub fn active_count(&self) -> usize {
        self.channels
            .lock()
            .iter()
            .filter(|channel| !channel.is_free())
            .count()
    }

    /// Returns the device attenuation range volumes are mapped onto.
    pub fn volume_range(&self) -> VolumeRange {
        self.volume_range
    }

    /// Returns the PCM format every channel was created for.
    pub fn format(&self) -> PcmFormat {
        self.format
    }
}

impl Drop for SoundPool {
    fn drop(&mut self) {
        // Take the channels out first so completions racing the teardown find nothing.
        let channels = std::mem::take(&mut *self.channels.lock());
        info!(channels = channels.len(), "Releasing sound pool");
        for channel in channels {
            channel.release();
        }
    }
}

impl fmt::Debug for SoundPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundPool")
            .field("channels", &self.max_channels)
            .field("active", &self.active_count())
            .field("format", &self.format)
            .field("store", &*self.store.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::output::mock::{MockOp, Output};
    use crate::output::PlayState;

    use super::*;

    fn pool(output: &Output, channels: usize) -> SoundPool {
        SoundPool::new(
            output,
            PoolOptions {
                channels,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_construction_errors() {
        let output = Output::initialized("mock");
        let result = SoundPool::new(
            &output,
            PoolOptions {
                channels: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(PoolError::NoChannelsRequested)));

        let output = Output::get("mock");
        let result = SoundPool::new(&output, PoolOptions::default());
        assert!(matches!(result, Err(PoolError::OutputNotInitialized)));

        let output = Output::initialized("mock").with_channel_limit(0);
        let result = SoundPool::new(&output, PoolOptions::default());
        assert!(matches!(result, Err(PoolError::NoChannelsCreated)));
    }

    #[test]
    fn test_partial_creation() {
        let output = Output::initialized("mock").with_channel_limit(3);
        let pool = pool(&output, 8);
        assert_eq!(pool.max_channels(), 3);
        assert_eq!(pool.channels().len(), 3);
        assert!(pool.channels().iter().all(ChannelSnapshot::is_free));
    }

    #[test]
    fn test_invalid_sound_is_ignored() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 2);
        assert_eq!(pool.play(Sound::INVALID, 1.0, false, 100).unwrap(), None);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(output.enqueue_count(0), 0);

        // Transport on the invalid sound must not touch free channels.
        pool.stop(Sound::INVALID).unwrap();
        pool.pause(Sound::INVALID).unwrap();
        assert_eq!(output.play_state(0), PlayState::Stopped);
    }

    #[test]
    fn test_unresolved_sound_does_not_preempt() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 1);
        let sound = pool.load(vec![0; 4]);
        assert_eq!(pool.play(sound, 1.0, false, 0).unwrap(), Some(0));

        let bogus = Sound::new(sound.id(), 42);
        assert_eq!(pool.play(bogus, 1.0, false, 100).unwrap(), None);
        assert_eq!(pool.channel(0).unwrap().sound_id, sound.id());
    }

    #[test]
    fn test_select() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 3);
        let sound = pool.load(vec![0; 4]);
        for priority in [4, 2, 2] {
            pool.play(sound, 1.0, false, priority).unwrap();
        }

        let channels = pool.channels.lock();
        assert_eq!(select(&channels, 1), Selection::Reject);
        assert_eq!(select(&channels, 2), Selection::Reject);
        assert_eq!(select(&channels, 3), Selection::Preempt(1));
    }

    #[test]
    fn test_select_prefers_free() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 3);
        let sound = pool.load(vec![0; 4]);
        pool.play(sound, 1.0, false, 0).unwrap();

        let channels = pool.channels.lock();
        assert_eq!(select(&channels, -5), Selection::Free(1));
    }

    #[test]
    fn test_failed_play_rolls_back() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 1);
        let sound = pool.load(vec![0; 4]);
        output.fail_next(0, MockOp::Enqueue);

        assert!(matches!(
            pool.play(sound, 1.0, false, 1),
            Err(PoolError::Output(_))
        ));
        assert!(pool.channel(0).unwrap().is_free());
        assert_eq!(pool.play(sound, 1.0, false, 1).unwrap(), Some(0));
    }

    #[test]
    fn test_transport_returns_first_error_and_visits_all() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 3);
        let sound = pool.load(vec![0; 4]);
        for _ in 0..3 {
            pool.play(sound, 1.0, false, 0).unwrap();
        }
        output.fail_next(1, MockOp::SetPlayState);

        assert!(pool.pause(sound).is_err());
        assert_eq!(output.play_state(0), PlayState::Paused);
        assert_eq!(output.play_state(1), PlayState::Playing);
        assert_eq!(output.play_state(2), PlayState::Paused);
        assert_eq!(pool.channel(1).unwrap().state, ChannelState::Playing);
    }

    #[test]
    fn test_load_decoded() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 1);

        let empty = DecodedAudio {
            pcm: Vec::new(),
            channel_count: 1,
            sample_rate: 44100,
        };
        assert!(matches!(
            pool.load_decoded(empty),
            Err(PoolError::EmptySample)
        ));

        let stereo = DecodedAudio {
            pcm: [100i16, 300].iter().flat_map(|s| s.to_le_bytes()).collect(),
            channel_count: 2,
            sample_rate: 44100,
        };
        let sound = pool.load_decoded(stereo).unwrap();
        assert_eq!(pool.play(sound, 1.0, false, 0).unwrap(), Some(0));
        assert_eq!(&output.head(0).unwrap()[..], &200i16.to_le_bytes());
        assert_eq!(pool.sample_count(), 1);
        assert_eq!(pool.memory_size(), 2);
    }

    #[test]
    fn test_drop_stops_and_releases_channels() {
        let output = Output::initialized("mock");
        let pool = pool(&output, 1);
        let sound = pool.load(vec![0; 4]);
        pool.play(sound, 1.0, false, 0).unwrap();
        drop(pool);

        assert_eq!(output.released(0), (true, true));
        assert!(!output.complete(0));
    }
}
