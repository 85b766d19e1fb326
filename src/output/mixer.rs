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
// Voice mixing logic that's independent of any audio backend
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{PcmBuffer, PcmFormat, PlayState, BYTES_PER_SAMPLE};

/// A buffer finished playing on a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The voice (channel) index.
    pub voice: usize,
    /// The queue generation the buffer was enqueued under.
    pub generation: u64,
}

/// A single software voice. Holds a queue of PCM buffers and a read position into the
/// buffer at the head of the queue.
struct Voice {
    play_state: PlayState,
    gain: f32,
    queue: VecDeque<(PcmBuffer, u64)>,
    /// Byte offset into the head buffer.
    position: usize,
    generation: u64,
}

impl Voice {
    fn new() -> Voice {
        Voice {
            play_state: PlayState::Stopped,
            gain: 1.0,
            queue: VecDeque::new(),
            position: 0,
            generation: 0,
        }
    }

    /// Mixes this voice into the interleaved output, recording a completion for every
    /// buffer that runs out.
    fn mix_into(&mut self, index: usize, output: &mut [f32], completions: &mut Vec<Completion>) {
        let mut written = 0;
        while written < output.len() {
            let Some((buffer, generation)) = self.queue.front() else {
                break;
            };

            // A trailing odd byte can't form a sample.
            let end = buffer.len() - buffer.len() % BYTES_PER_SAMPLE;
            if self.position >= end {
                completions.push(Completion {
                    voice: index,
                    generation: *generation,
                });
                self.queue.pop_front();
                self.position = 0;
                continue;
            }

            let available = (end - self.position) / BYTES_PER_SAMPLE;
            let to_mix = available.min(output.len() - written);
            let bytes = &buffer[self.position..self.position + to_mix * BYTES_PER_SAMPLE];
            for (out, pair) in output[written..written + to_mix]
                .iter_mut()
                .zip(bytes.chunks_exact(BYTES_PER_SAMPLE))
            {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                *out += sample as f32 / 32768.0 * self.gain;
            }

            written += to_mix;
            self.position += to_mix * BYTES_PER_SAMPLE;
        }

        // Report a buffer that ran out exactly at the end of this block now rather than on
        // the next callback.
        if let Some((buffer, generation)) = self.queue.front() {
            let end = buffer.len() - buffer.len() % BYTES_PER_SAMPLE;
            if self.position >= end {
                completions.push(Completion {
                    voice: index,
                    generation: *generation,
                });
                self.queue.pop_front();
                self.position = 0;
            }
        }
    }
}

/// Converts a millibel attenuation into a linear gain.
pub fn millibel_to_gain(level: i32) -> f32 {
    10f32.powf(level as f32 / 2000.0)
}

/// Mixes any number of voices into one interleaved output stream.
#[derive(Clone)]
pub struct Mixer {
    voices: Arc<RwLock<Vec<Arc<Mutex<Voice>>>>>,
    format: PcmFormat,
}

impl Mixer {
    /// Creates a new mixer producing the given format.
    pub fn new(format: PcmFormat) -> Mixer {
        Mixer {
            voices: Arc::new(RwLock::new(Vec::new())),
            format,
        }
    }

    /// Gets the output format.
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Adds a stopped, empty voice and returns its index.
    pub fn add_voice(&self) -> usize {
        let mut voices = self.voices.write();
        voices.push(Arc::new(Mutex::new(Voice::new())));
        voices.len() - 1
    }

    /// Returns the number of voices.
    pub fn voice_count(&self) -> usize {
        self.voices.read().len()
    }

    fn voice(&self, index: usize) -> Option<Arc<Mutex<Voice>>> {
        self.voices.read().get(index).cloned()
    }

    /// Sets the voice gain from a millibel level. Returns false for an unknown voice.
    pub fn set_level(&self, index: usize, level: i32) -> bool {
        match self.voice(index) {
            Some(voice) => {
                voice.lock().gain = millibel_to_gain(level);
                true
            }
            None => false,
        }
    }

    /// Drops everything queued on the voice and returns the new generation.
    pub fn clear(&self, index: usize) -> Option<u64> {
        let voice = self.voice(index)?;
        let mut voice = voice.lock();
        voice.queue.clear();
        voice.position = 0;
        voice.generation += 1;
        Some(voice.generation)
    }

    /// Appends a buffer to the voice queue.
    pub fn enqueue(&self, index: usize, buffer: PcmBuffer) -> bool {
        match self.voice(index) {
            Some(voice) => {
                let mut voice = voice.lock();
                let generation = voice.generation;
                voice.queue.push_back((buffer, generation));
                true
            }
            None => false,
        }
    }

    /// Sets the voice transport state. Stopping rewinds the head buffer.
    pub fn set_play_state(&self, index: usize, state: PlayState) -> bool {
        match self.voice(index) {
            Some(voice) => {
                let mut voice = voice.lock();
                voice.play_state = state;
                if state == PlayState::Stopped {
                    voice.position = 0;
                }
                true
            }
            None => false,
        }
    }

    /// Mixes every playing voice into `output` (interleaved, in the mixer format). Buffers
    /// that finish during this block are appended to `completions`.
    pub fn process_into_output(&self, output: &mut [f32], completions: &mut Vec<Completion>) {
        output.fill(0.0);

        let voices = self.voices.read();
        for (index, voice) in voices.iter().enumerate() {
            let mut voice = voice.lock();
            if voice.play_state != PlayState::Playing {
                continue;
            }
            voice.mix_into(index, output, completions);
        }

        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> PcmBuffer {
        samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect::<Vec<u8>>()
            .into()
    }

    #[test]
    fn test_stopped_voice_is_silent() {
        let mixer = Mixer::new(PcmFormat::new(1, 44100));
        let voice = mixer.add_voice();
        mixer.enqueue(voice, pcm(&[16384, 16384]));

        let mut output = vec![1.0; 4];
        let mut completions = Vec::new();
        mixer.process_into_output(&mut output, &mut completions);
        assert_eq!(output, vec![0.0; 4]);
        assert!(completions.is_empty());
    }

    #[test]
    fn test_buffer_completion_is_reported_once() {
        let mixer = Mixer::new(PcmFormat::new(1, 44100));
        let voice = mixer.add_voice();
        let generation = mixer.clear(voice).unwrap();
        mixer.enqueue(voice, pcm(&[16384, -16384, 16384]));
        mixer.set_play_state(voice, PlayState::Playing);

        let mut output = vec![0.0; 2];
        let mut completions = Vec::new();
        mixer.process_into_output(&mut output, &mut completions);
        assert_eq!(output, vec![0.5, -0.5]);
        assert!(completions.is_empty());

        mixer.process_into_output(&mut output, &mut completions);
        assert_eq!(output, vec![0.5, 0.0]);
        assert_eq!(
            completions,
            vec![Completion {
                voice,
                generation
            }]
        );

        completions.clear();
        mixer.process_into_output(&mut output, &mut completions);
        assert!(completions.is_empty());
    }

    #[test]
    fn test_completion_at_block_boundary() {
        let mixer = Mixer::new(PcmFormat::new(1, 44100));
        let voice = mixer.add_voice();
        mixer.enqueue(voice, pcm(&[100, 100]));
        mixer.set_play_state(voice, PlayState::Playing);

        let mut output = vec![0.0; 2];
        let mut completions = Vec::new();
        mixer.process_into_output(&mut output, &mut completions);
        assert_eq!(completions.len(), 1);
    }

    #[test]
    fn test_voices_are_summed_and_clamped() {
        let mixer = Mixer::new(PcmFormat::new(1, 44100));
        for _ in 0..3 {
            let voice = mixer.add_voice();
            mixer.enqueue(voice, pcm(&[16384, 16384]));
            mixer.set_play_state(voice, PlayState::Playing);
        }
        mixer.set_play_state(2, PlayState::Paused);

        let mut output = vec![0.0; 1];
        let mut completions = Vec::new();
        mixer.process_into_output(&mut output, &mut completions);
        assert_eq!(output, vec![1.0]);

        let voice = mixer.add_voice();
        mixer.enqueue(voice, pcm(&[i16::MAX; 4]));
        mixer.set_play_state(voice, PlayState::Playing);
        mixer.process_into_output(&mut output, &mut completions);
        assert_eq!(output, vec![1.0]);
    }

    #[test]
    fn test_gain() {
        assert_eq!(millibel_to_gain(0), 1.0);
        assert!((millibel_to_gain(-2000) - 0.1).abs() < 1e-6);

        let mixer = Mixer::new(PcmFormat::new(1, 44100));
        let voice = mixer.add_voice();
        assert!(mixer.set_level(voice, -2000));
        mixer.enqueue(voice, pcm(&[16384]));
        mixer.set_play_state(voice, PlayState::Playing);

        let mut output = vec![0.0; 1];
        let mut completions = Vec::new();
        mixer.process_into_output(&mut output, &mut completions);
        assert!((output[0] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_clear_bumps_generation() {
        let mixer = Mixer::new(PcmFormat::new(1, 44100));
        let voice = mixer.add_voice();
        assert_eq!(mixer.clear(voice), Some(1));
        assert_eq!(mixer.clear(voice), Some(2));
        assert_eq!(mixer.clear(voice + 1), None);
        assert!(!mixer.enqueue(voice + 1, pcm(&[0])));
    }
}
