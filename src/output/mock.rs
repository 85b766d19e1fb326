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
use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    ChannelResource, CompletionCallback, OutputError, OutputProvider, PcmBuffer, PcmFormat,
    PlayState, VolumeRange,
};

/// Channel operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    SetVolume,
    Clear,
    Enqueue,
    SetPlayState,
}

impl MockOp {
    fn name(self) -> &'static str {
        match self {
            MockOp::SetVolume => "set_volume",
            MockOp::Clear => "clear",
            MockOp::Enqueue => "enqueue",
            MockOp::SetPlayState => "set_play_state",
        }
    }
}

/// The recorded state of a mock channel.
struct ChannelState {
    play_state: PlayState,
    volume: Option<i32>,
    /// Queued buffers along with the generation they were enqueued under.
    queue: VecDeque<(PcmBuffer, u64)>,
    generation: u64,
    enqueued: usize,
    failures: Vec<MockOp>,
    released: bool,
    stopped_before_release: bool,
}

struct MockChannel {
    state: Mutex<ChannelState>,
    on_complete: CompletionCallback,
}

impl MockChannel {
    fn check(state: &mut ChannelState, op: MockOp) -> Result<(), OutputError> {
        if let Some(pos) = state.failures.iter().position(|f| *f == op) {
            state.failures.remove(pos);
            return Err(OutputError::Operation {
                op: op.name(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// The resource handed to the pool. Dropping it marks the mock channel as released.
struct Channel {
    inner: Arc<MockChannel>,
}

impl ChannelResource for Channel {
    fn set_volume(&self, level: i32) -> Result<(), OutputError> {
        let mut state = self.inner.state.lock();
        MockChannel::check(&mut state, MockOp::SetVolume)?;
        state.volume = Some(level);
        Ok(())
    }

    fn clear(&self) -> Result<u64, OutputError> {
        let mut state = self.inner.state.lock();
        MockChannel::check(&mut state, MockOp::Clear)?;
        state.queue.clear();
        state.generation += 1;
        Ok(state.generation)
    }

    fn enqueue(&self, buffer: PcmBuffer) -> Result<(), OutputError> {
        let mut state = self.inner.state.lock();
        MockChannel::check(&mut state, MockOp::Enqueue)?;
        let generation = state.generation;
        state.queue.push_back((buffer, generation));
        state.enqueued += 1;
        Ok(())
    }

    fn set_play_state(&self, play_state: PlayState) -> Result<(), OutputError> {
        let mut state = self.inner.state.lock();
        MockChannel::check(&mut state, MockOp::SetPlayState)?;
        state.play_state = play_state;
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.stopped_before_release = state.play_state == PlayState::Stopped;
        state.released = true;
    }
}

/// A mock output. Doesn't actually play anything; buffers sit in per-channel queues until
/// a test calls [`Output::complete`].
pub struct Output {
    name: String,
    initialized: bool,
    volume_range: VolumeRange,
    channel_limit: Option<usize>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
}

impl Output {
    /// Gets the given mock output. It still has to be initialized.
    pub fn get(name: &str) -> Output {
        Output {
            name: name.to_string(),
            initialized: false,
            volume_range: VolumeRange::default(),
            channel_limit: None,
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Gets an already initialized mock output.
    pub fn initialized(name: &str) -> Output {
        let mut output = Output::get(name);
        output.initialized = true;
        output
    }

    /// Limits how many channels can be created before creation starts failing.
    pub fn with_channel_limit(mut self, limit: usize) -> Output {
        self.channel_limit = Some(limit);
        self
    }

    /// Overrides the reported volume range.
    pub fn with_volume_range(mut self, range: VolumeRange) -> Output {
        self.volume_range = range;
        self
    }

    fn channel(&self, index: usize) -> Arc<MockChannel> {
        match self.channels.lock().get(index) {
            Some(channel) => channel.clone(),
            None => panic!("mock channel {} was never created", index),
        }
    }

    /// Returns the number of channels created so far.
    pub fn created_channels(&self) -> usize {
        self.channels.lock().len()
    }

    /// Returns the play state of the given channel.
    pub fn play_state(&self, index: usize) -> PlayState {
        self.channel(index).state.lock().play_state
    }

    /// Returns the last volume level applied to the given channel.
    pub fn volume(&self, index: usize) -> Option<i32> {
        self.channel(index).state.lock().volume
    }

    /// Returns the number of buffers waiting in the given channel's queue.
    pub fn queued(&self, index: usize) -> usize {
        self.channel(index).state.lock().queue.len()
    }

    /// Returns the buffer at the head of the given channel's queue.
    pub fn head(&self, index: usize) -> Option<PcmBuffer> {
        self.channel(index)
            .state
            .lock()
            .queue
            .front()
            .map(|(buffer, _)| buffer.clone())
    }

    /// Returns the total number of buffers ever enqueued on the given channel.
    pub fn enqueue_count(&self, index: usize) -> usize {
        self.channel(index).state.lock().enqueued
    }

    /// Returns true if the pool has released the given channel, and whether it was
    /// stopped first.
    pub fn released(&self, index: usize) -> (bool, bool) {
        let channel = self.channel(index);
        let state = channel.state.lock();
        (state.released, state.stopped_before_release)
    }

    /// Makes the next call of the given operation on the given channel fail.
    pub fn fail_next(&self, index: usize, op: MockOp) {
        self.channel(index).state.lock().failures.push(op);
    }

    /// Simulates the device finishing the buffer at the head of the channel's queue.
    /// The completion callback runs on the calling thread. Returns false if nothing was
    /// playing.
    pub fn complete(&self, index: usize) -> bool {
        let channel = self.channel(index);
        let generation = {
            let mut state = channel.state.lock();
            if state.play_state != PlayState::Playing {
                return false;
            }
            match state.queue.pop_front() {
                Some((_, generation)) => generation,
                None => return false,
            }
        };

        debug!(channel = index, generation, "Mock buffer completed");
        (channel.on_complete)(generation);
        true
    }
}

impl OutputProvider for Output {
    fn initialize(&mut self) -> Result<(), OutputError> {
        if self.initialized {
            return Err(OutputError::AlreadyInitialized);
        }
        info!(output = self.name, "Initializing mock output.");
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn shutdown(&mut self) {
        self.initialized = false;
    }

    fn create_channel(
        &self,
        format: PcmFormat,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn ChannelResource>, OutputError> {
        if !self.initialized {
            return Err(OutputError::NotInitialized);
        }

        let mut channels = self.channels.lock();
        if self.channel_limit.is_some_and(|limit| channels.len() >= limit) {
            return Err(OutputError::ChannelLimit);
        }

        debug!(output = self.name, %format, index = channels.len(), "Created mock channel");
        let inner = Arc::new(MockChannel {
            state: Mutex::new(ChannelState {
                play_state: PlayState::Stopped,
                volume: None,
                queue: VecDeque::new(),
                generation: 0,
                enqueued: 0,
                failures: Vec::new(),
                released: false,
                stopped_before_release: false,
            }),
            on_complete,
        });
        channels.push(inner.clone());
        Ok(Box::new(Channel { inner }))
    }

    fn volume_range(&self) -> VolumeRange {
        self.volume_range
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn counting_callback() -> (Arc<AtomicU64>, CompletionCallback) {
        let last = Arc::new(AtomicU64::new(u64::MAX));
        let captured = last.clone();
        (
            last,
            Box::new(move |generation| captured.store(generation, Ordering::SeqCst)),
        )
    }

    #[test]
    fn test_uninitialized_output_refuses_channels() {
        let output = Output::get("mock");
        let (_, callback) = counting_callback();
        assert!(matches!(
            output.create_channel(PcmFormat::default(), callback),
            Err(OutputError::NotInitialized)
        ));
    }

    #[test]
    fn test_channel_limit() {
        let output = Output::initialized("mock").with_channel_limit(1);
        let (_, first) = counting_callback();
        let (_, second) = counting_callback();
        assert!(output.create_channel(PcmFormat::default(), first).is_ok());
        assert!(matches!(
            output.create_channel(PcmFormat::default(), second),
            Err(OutputError::ChannelLimit)
        ));
        assert_eq!(output.created_channels(), 1);
    }

    #[test]
    fn test_complete_reports_enqueue_generation() {
        let output = Output::initialized("mock");
        let (last, callback) = counting_callback();
        let channel = output
            .create_channel(PcmFormat::default(), callback)
            .unwrap();

        let generation = channel.clear().unwrap();
        channel.enqueue(Arc::from(vec![0u8; 4])).unwrap();

        // Not playing yet, so nothing is consumed.
        assert!(!output.complete(0));

        channel.set_play_state(PlayState::Playing).unwrap();
        assert!(output.complete(0));
        assert_eq!(last.load(Ordering::SeqCst), generation);
        assert!(!output.complete(0));
    }

    #[test]
    fn test_injected_failure_is_consumed() {
        let output = Output::initialized("mock");
        let (_, callback) = counting_callback();
        let channel = output
            .create_channel(PcmFormat::default(), callback)
            .unwrap();

        output.fail_next(0, MockOp::Enqueue);
        assert!(channel.enqueue(Arc::from(vec![0u8; 2])).is_err());
        assert!(channel.enqueue(Arc::from(vec![0u8; 2])).is_ok());
        assert_eq!(output.enqueue_count(0), 1);
    }

    #[test]
    fn test_release_is_recorded() {
        let output = Output::initialized("mock");
        let (_, callback) = counting_callback();
        let channel = output
            .create_channel(PcmFormat::default(), callback)
            .unwrap();
        channel.set_play_state(PlayState::Playing).unwrap();
        drop(channel);
        assert_eq!(output.released(0), (true, false));
    }
}
