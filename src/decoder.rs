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
pub mod symphonia;

/// Error types for decoding.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unable to probe audio format: {0}")]
    Probe(String),

    #[error("no audio track found")]
    NoTrack,

    #[error("audio codec error: {0}")]
    Codec(#[from] ::symphonia::core::errors::Error),

    #[error("decoded audio is empty")]
    Empty,
}

/// Fully decoded audio: interleaved signed 16-bit little-endian PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub pcm: Vec<u8>,
    pub channel_count: u16,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Returns true if there's nothing playable.
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty() || self.channel_count == 0 || self.sample_rate == 0
    }

    /// Returns the number of whole frames.
    pub fn frames(&self) -> usize {
        let frame_size = self.channel_count as usize * crate::output::BYTES_PER_SAMPLE;
        if frame_size == 0 {
            return 0;
        }
        self.pcm.len() / frame_size
    }

    /// Returns the playback duration.
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Turns an encoded byte buffer into PCM.
pub trait Decoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DecodedAudio, DecodeError>;
}
