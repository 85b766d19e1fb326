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

//! A fixed pool of playback channels for short, pre-decoded sound effects.
//!
//! Samples are decoded up front and held in memory. Playing a sound takes a free
//! channel, or preempts a lower priority one, and hands the PCM straight to the audio
//! output.

pub mod config;
pub mod decoder;
pub mod output;
pub mod pool;
pub mod samples;
#[cfg(test)]
mod testutil;

pub use pool::{PoolError, PoolOptions, SoundPool};
pub use samples::Sound;
