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

//! The boundary between the channel pool and whatever actually makes sound.
//!
//! An output provider owns the output sink and hands out one
//! [`ChannelResource`] per pool channel. The pool only ever talks to these
//! traits, so tests run against [`mock::Output`] and real playback goes through
//! [`cpal::Output`].

use std::fmt;
use std::sync::Arc;

pub mod cpal;
mod error;
pub mod mixer;
pub mod mock;

pub use error::OutputError;

/// Shared, immutable PCM bytes (signed 16-bit little-endian, interleaved).
pub type PcmBuffer = Arc<[u8]>;

/// Invoked each time a channel finishes consuming a queued buffer. The argument is the
/// queue generation the buffer was enqueued under (see [`ChannelResource::clear`]).
pub type CompletionCallback = Box<dyn Fn(u64) + Send + Sync + 'static>;

/// Bytes per PCM sample. The pool only deals in signed 16-bit audio.
pub const BYTES_PER_SAMPLE: usize = 2;

/// The fixed PCM layout a channel is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PcmFormat {
    pub fn new(channels: u16, sample_rate: u32) -> PcmFormat {
        PcmFormat {
            channels,
            sample_rate,
        }
    }

    /// Bytes in one interleaved frame.
    pub fn frame_size(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }
}

impl Default for PcmFormat {
    /// Mono, 44.1kHz.
    fn default() -> Self {
        PcmFormat::new(1, 44100)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "s16le, {} channel(s), {}Hz",
            self.channels, self.sample_rate
        )
    }
}

/// Transport state of a channel resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Paused,
    Playing,
}

/// The device's supported attenuation range in millibels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeRange {
    pub min: i32,
    pub max: i32,
}

impl VolumeRange {
    pub fn new(min: i32, max: i32) -> VolumeRange {
        VolumeRange { min, max }
    }

    /// Maps a normalized volume onto the device range. Values outside [0.0, 1.0] are
    /// clamped; NaN is treated as silence.
    pub fn level(&self, volume: f32) -> i32 {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        let (low, high) = (self.min.min(self.max) as f64, self.min.max(self.max) as f64);
        let span = self.max as f64 - self.min as f64;
        let level = self.min as f64 + (span * volume as f64).round();
        level.max(low).min(high) as i32
    }
}

impl Default for VolumeRange {
    /// -5dB to 0dB.
    fn default() -> Self {
        VolumeRange::new(-500, 0)
    }
}

/// One hardware-backed playback slot.
///
/// Implementations must never invoke the channel's completion callback from inside
/// one of these methods; the pool holds its channel lock while calling them.
pub trait ChannelResource: Send + Sync {
    /// Sets the channel attenuation in millibels.
    fn set_volume(&self, level: i32) -> Result<(), OutputError>;

    /// Drops everything queued on the channel and returns the new queue generation.
    /// Completions for buffers enqueued before the clear report the old generation.
    fn clear(&self) -> Result<u64, OutputError>;

    /// Appends a buffer to the channel queue.
    fn enqueue(&self, buffer: PcmBuffer) -> Result<(), OutputError>;

    /// Transitions the channel between playing, paused and stopped.
    fn set_play_state(&self, state: PlayState) -> Result<(), OutputError>;
}

/// Owns the output sink and creates channel resources bound to it.
///
/// There should be one provider per process. It must be initialized before a pool is
/// constructed against it.
pub trait OutputProvider: Send + Sync {
    /// Acquires the output device/sink.
    fn initialize(&mut self) -> Result<(), OutputError>;

    /// Returns true once `initialize` has succeeded and until `shutdown`.
    fn is_initialized(&self) -> bool;

    /// Releases the output device/sink.
    fn shutdown(&mut self);

    /// Creates a new channel resource for the given format. The callback is registered
    /// for the lifetime of the resource.
    fn create_channel(
        &self,
        format: PcmFormat,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn ChannelResource>, OutputError>;

    /// Returns the device attenuation range.
    fn volume_range(&self) -> VolumeRange;
}
