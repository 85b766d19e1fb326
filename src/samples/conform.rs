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

//! Brings decoder output into the pool's fixed PCM format.

use tracing::info;

use crate::decoder::DecodedAudio;
use crate::output::{PcmFormat, BYTES_PER_SAMPLE};

/// Converts decoded audio into interleaved s16le bytes in the given format. Audio that
/// already matches is passed through untouched.
pub fn conform(decoded: DecodedAudio, format: PcmFormat) -> Vec<u8> {
    if decoded.channel_count == format.channels && decoded.sample_rate == format.sample_rate {
        return decoded.pcm;
    }

    info!(
        source_channels = decoded.channel_count,
        source_rate = decoded.sample_rate,
        target = %format,
        "Conforming sample"
    );

    let samples: Vec<f32> = decoded
        .pcm
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32)
        .collect();

    let remixed = remix(&samples, decoded.channel_count, format.channels);
    let resampled = if decoded.sample_rate == format.sample_rate {
        remixed
    } else {
        transcode_samples(
            &remixed,
            format.channels,
            decoded.sample_rate,
            format.sample_rate,
        )
    };

    resampled
        .into_iter()
        .flat_map(|sample| {
            let clamped = sample.round().clamp(i16::MIN as f32, i16::MAX as f32);
            (clamped as i16).to_le_bytes()
        })
        .collect()
}

/// Changes the channel count. Mono targets get the average of all source channels; other
/// targets copy matching channels and repeat the last source channel for any extras.
fn remix(samples: &[f32], source_channels: u16, target_channels: u16) -> Vec<f32> {
    if source_channels == target_channels || source_channels == 0 || target_channels == 0 {
        return samples.to_vec();
    }

    let source = source_channels as usize;
    let target = target_channels as usize;
    let frames = samples.len() / source;
    let mut output = Vec::with_capacity(frames * target);

    for frame in samples.chunks_exact(source) {
        if target == 1 {
            output.push(frame.iter().sum::<f32>() / source as f32);
            continue;
        }
        for channel in 0..target {
            output.push(frame[channel.min(source - 1)]);
        }
    }

    output
}

/// Transcodes samples from one sample rate to another using linear interpolation.
/// Linear interpolation is sufficient for short one-shot effects.
fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count.max(1) as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let idx0 = source_frame * channels + channel;
            let idx1 = (source_frame + 1) * channels + channel;

            let s0 = samples.get(idx0).copied().unwrap_or(0.0);
            let s1 = samples.get(idx1).copied().unwrap_or(s0);

            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}
