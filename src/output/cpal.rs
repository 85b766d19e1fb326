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
use std::{fmt, sync::Arc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, span, warn, Level};

use super::mixer::{Completion, Mixer};
use super::{
    ChannelResource, CompletionCallback, OutputError, OutputProvider, PcmBuffer, PcmFormat,
    PlayState, VolumeRange,
};

/// Lists the names of the output devices on the default host.
pub fn list_devices() -> Result<Vec<String>, OutputError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| OutputError::Device(e.to_string()))?;

    let mut names: Vec<String> = devices
        .filter_map(|device| match device.name() {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(err = e.to_string(), "Unable to read output device name");
                None
            }
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Everything that only exists while the output is initialized.
struct Running {
    /// The voice mixer rendered by the stream callback.
    mixer: Mixer,
    /// Completion callbacks, indexed by voice.
    callbacks: Arc<RwLock<Vec<CompletionCallback>>>,
    /// Dropping or signalling this tears down the stream.
    shutdown_tx: Sender<()>,
    /// Owns the cpal stream (streams are not Send).
    stream_thread: Option<thread::JoinHandle<()>>,
    /// Invokes completion callbacks off the audio thread.
    dispatch_thread: Option<thread::JoinHandle<()>>,
}

/// An output backed by a cpal output stream. Every channel is a software voice mixed into
/// the one stream.
pub struct Output {
    /// The device to open. The host default is used when unset.
    device_name: Option<String>,
    /// Overrides the device's default output format.
    format: Option<PcmFormat>,
    volume_range: VolumeRange,
    running: Option<Running>,
}

/// A channel resource bound to one mixer voice.
struct Channel {
    mixer: Mixer,
    voice: usize,
}

impl Channel {
    fn missing(&self, op: &'static str) -> OutputError {
        OutputError::Operation {
            op,
            reason: format!("voice {} does not exist", self.voice),
        }
    }
}

impl ChannelResource for Channel {
    fn set_volume(&self, level: i32) -> Result<(), OutputError> {
        if self.mixer.set_level(self.voice, level) {
            Ok(())
        } else {
            Err(self.missing("set_volume"))
        }
    }

    fn clear(&self) -> Result<u64, OutputError> {
        self.mixer
            .clear(self.voice)
            .ok_or_else(|| self.missing("clear"))
    }

    fn enqueue(&self, buffer: PcmBuffer) -> Result<(), OutputError> {
        if self.mixer.enqueue(self.voice, buffer) {
            Ok(())
        } else {
            Err(self.missing("enqueue"))
        }
    }

    fn set_play_state(&self, state: PlayState) -> Result<(), OutputError> {
        if self.mixer.set_play_state(self.voice, state) {
            Ok(())
        } else {
            Err(self.missing("set_play_state"))
        }
    }
}

/// Builds the output stream for sample type T. The mixer renders f32 which is converted
/// into the device's sample type.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Mixer,
    completion_tx: Sender<Completion>,
) -> Result<cpal::Stream, OutputError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let mut completions: Vec<Completion> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.process_into_output(&mut scratch, &mut completions);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
                for completion in completions.drain(..) {
                    // The dispatcher only goes away during shutdown.
                    let _ = completion_tx.send(completion);
                }
            },
            |err| error!("CPAL output stream error: {}", err),
            None,
        )
        .map_err(|e| OutputError::Stream(e.to_string()))
}

/// Delivers completions to the registered callbacks until the stream goes away.
fn dispatch_completions(
    completion_rx: Receiver<Completion>,
    callbacks: Arc<RwLock<Vec<CompletionCallback>>>,
) {
    for completion in completion_rx.iter() {
        let callbacks = callbacks.read();
        match callbacks.get(completion.voice) {
            Some(callback) => callback(completion.generation),
            None => debug!(voice = completion.voice, "Completion for unknown voice"),
        }
    }
    debug!("Completion dispatcher exiting");
}

impl Output {
    /// Creates an uninitialized cpal output.
    pub fn new(
        device_name: Option<String>,
        format: Option<PcmFormat>,
        volume_range: VolumeRange,
    ) -> Output {
        Output {
            device_name,
            format,
            volume_range,
            running: None,
        }
    }

    /// The format channels must be created with. Only known once initialized.
    pub fn format(&self) -> Option<PcmFormat> {
        self.running.as_ref().map(|running| running.mixer.format())
    }

    fn find_device(&self) -> Result<cpal::Device, OutputError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| OutputError::Device(e.to_string()))?
                .find(|device| {
                    device
                        .name()
                        .map(|device_name| device_name.trim() == name.as_str())
                        .unwrap_or(false)
                })
                .ok_or_else(|| OutputError::Device(format!("no device found with name {}", name))),
            None => host
                .default_output_device()
                .ok_or_else(|| OutputError::Device("no default output device".to_string())),
        }
    }
}

impl OutputProvider for Output {
    fn initialize(&mut self) -> Result<(), OutputError> {
        if self.running.is_some() {
            return Err(OutputError::AlreadyInitialized);
        }

        let span = span!(Level::INFO, "initialize output (cpal)");
        let _enter = span.enter();

        let device = self.find_device()?;
        let supported = device
            .default_output_config()
            .map_err(|e| OutputError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.config();
        if let Some(format) = self.format {
            config.channels = format.channels;
            config.sample_rate = cpal::SampleRate(format.sample_rate);
        }
        let format = PcmFormat::new(config.channels, config.sample_rate.0);

        let mixer = Mixer::new(format);
        let callbacks: Arc<RwLock<Vec<CompletionCallback>>> = Arc::new(RwLock::new(Vec::new()));
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), OutputError>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let stream_thread = {
            let mixer = mixer.clone();
            thread::spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &config, mixer, completion_tx)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &config, mixer, completion_tx)
                    }
                    cpal::SampleFormat::I32 => {
                        build_stream::<i32>(&device, &config, mixer, completion_tx)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&device, &config, mixer, completion_tx)
                    }
                    other => Err(OutputError::UnsupportedFormat(format!(
                        "device sample format {:?}",
                        other
                    ))),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(OutputError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until shutdown.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
        };

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(OutputError::Stream("output thread exited".to_string())));
        if let Err(e) = ready {
            let _ = stream_thread.join();
            error!(err = %e, "Failed to start CPAL output stream");
            return Err(e);
        }

        let dispatch_thread = {
            let callbacks = callbacks.clone();
            thread::spawn(move || dispatch_completions(completion_rx, callbacks))
        };

        info!(%format, device = self.device_name.as_deref().unwrap_or("default"), "CPAL output stream started");
        self.running = Some(Running {
            mixer,
            callbacks,
            shutdown_tx,
            stream_thread: Some(stream_thread),
            dispatch_thread: Some(dispatch_thread),
        });
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    fn shutdown(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        if let Some(thread) = running.stream_thread.take() {
            if thread.join().is_err() {
                error!("CPAL output thread panicked");
            }
        }
        // The stream owned the only completion sender, so the dispatcher drains and exits.
        if let Some(thread) = running.dispatch_thread.take() {
            if thread.join().is_err() {
                error!("Completion dispatcher panicked");
            }
        }
        info!("CPAL output stopped");
    }

    fn create_channel(
        &self,
        format: PcmFormat,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn ChannelResource>, OutputError> {
        let running = self.running.as_ref().ok_or(OutputError::NotInitialized)?;
        if format != running.mixer.format() {
            return Err(OutputError::UnsupportedFormat(format!(
                "channel format {} does not match output format {}",
                format,
                running.mixer.format()
            )));
        }

        // Register the callback before the voice exists so a completion can never race
        // ahead of its callback.
        let mut callbacks = running.callbacks.write();
        callbacks.push(on_complete);
        let voice = running.mixer.add_voice();
        drop(callbacks);

        debug!(voice, "Created CPAL voice");
        Ok(Box::new(Channel {
            mixer: running.mixer.clone(),
            voice,
        }))
    }

    fn volume_range(&self) -> VolumeRange {
        self.volume_range
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (CPAL)",
            self.device_name.as_deref().unwrap_or("default")
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::testutil::eventually;

    use super::*;

    #[test]
    fn test_uninitialized_output() {
        let output = Output::new(None, None, VolumeRange::default());
        assert!(!output.is_initialized());
        assert!(output.format().is_none());
        assert!(matches!(
            output.create_channel(PcmFormat::default(), Box::new(|_| {})),
            Err(OutputError::NotInitialized)
        ));
    }

    #[test]
    fn test_shutdown_without_initialize() {
        let mut output = Output::new(Some("nope".to_string()), None, VolumeRange::new(-100, 0));
        output.shutdown();
        assert_eq!(output.volume_range(), VolumeRange::new(-100, 0));
        assert_eq!(output.to_string(), "nope (CPAL)");
    }

    #[test]
    fn test_dispatcher_routes_by_voice() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let seen = Arc::new(AtomicU64::new(0));
        let callbacks: Arc<RwLock<Vec<CompletionCallback>>> = {
            let first = seen.clone();
            let second = seen.clone();
            Arc::new(RwLock::new(vec![
                Box::new(move |generation| {
                    first.fetch_add(generation, Ordering::SeqCst);
                }),
                Box::new(move |generation| {
                    second.fetch_add(generation * 100, Ordering::SeqCst);
                }),
            ]))
        };

        let dispatcher = {
            let callbacks = callbacks.clone();
            thread::spawn(move || dispatch_completions(rx, callbacks))
        };
        tx.send(Completion {
            voice: 0,
            generation: 3,
        })
        .unwrap();
        eventually(
            || seen.load(Ordering::SeqCst) == 3,
            "first completion was never dispatched",
        );
        tx.send(Completion {
            voice: 1,
            generation: 2,
        })
        .unwrap();
        tx.send(Completion {
            voice: 7,
            generation: 9,
        })
        .unwrap();
        drop(tx);

        dispatcher.join().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 203);
    }
}
