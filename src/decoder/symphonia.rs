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
use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use super::{DecodedAudio, DecodeError, Decoder};

/// Decodes anything symphonia can read (Ogg/Vorbis, WAV, FLAC, MP3, ...) into
/// interleaved 16-bit PCM.
#[derive(Debug, Default, Clone)]
pub struct SymphoniaDecoder {
    /// Optional file extension used as a probe hint.
    extension: Option<String>,
}

impl SymphoniaDecoder {
    /// Creates a new decoder with no format hint.
    pub fn new() -> SymphoniaDecoder {
        SymphoniaDecoder { extension: None }
    }

    /// Creates a decoder that hints the prober with a file extension.
    pub fn with_extension(extension: &str) -> SymphoniaDecoder {
        SymphoniaDecoder {
            extension: Some(extension.to_string()),
        }
    }

    /// Reads the next packet. Returns Ok(None) at end of stream.
    fn read_next_packet(
        format_reader: &mut dyn FormatReader,
        decoder: &mut dyn symphonia::core::codecs::Decoder,
    ) -> Result<Option<Packet>, DecodeError> {
        loop {
            match format_reader.next_packet() {
                Ok(packet) => return Ok(Some(packet)),
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                // Some readers report a decode error at end of stream.
                Err(SymphoniaError::DecodeError(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedAudio, DecodeError> {
        let cursor = Cursor::new(data.to_vec());
        let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = &self.extension {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| DecodeError::Probe(e.to_string()))?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder_opts: DecoderOptions = Default::default();
        let mut decoder = get_codecs().make(&params, &decoder_opts)?;

        let mut channel_count = params.channels.map(|c| c.count() as u16).unwrap_or(0);
        let mut sample_rate = params.sample_rate.unwrap_or(0);
        let mut pcm = Vec::new();

        while let Some(packet) =
            Self::read_next_packet(format_reader.as_mut(), decoder.as_mut())?
        {
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    decoder.decode(&packet)?
                }
                // A corrupt packet is skipped rather than failing the whole sample.
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(err = %e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Header packets (e.g. Vorbis) decode to zero frames.
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            if channel_count == 0 {
                channel_count = spec.channels.count() as u16;
            }
            if sample_rate == 0 {
                sample_rate = spec.rate;
            }

            let mut sample_buffer = SampleBuffer::<i16>::new(decoded.frames() as u64, spec);
            sample_buffer.copy_interleaved_ref(decoded);
            pcm.extend(sample_buffer.samples().iter().flat_map(|s| s.to_le_bytes()));
        }

        let audio = DecodedAudio {
            pcm,
            channel_count,
            sample_rate,
        };
        if audio.is_empty() {
            return Err(DecodeError::Empty);
        }

        debug!(
            channels = audio.channel_count,
            sample_rate = audio.sample_rate,
            bytes = audio.pcm.len(),
            "Decoded sample"
        );
        Ok(audio)
    }
}
