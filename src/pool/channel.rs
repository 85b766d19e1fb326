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
use tracing::{trace, warn};

use crate::output::{ChannelResource, OutputError, PcmBuffer, PlayState};

/// The priority a free channel reports. Every request outranks it.
pub const FREE_PRIORITY: i32 = i32::MIN;

/// Scheduling state of a pool channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Free,
    Playing,
    Paused,
}

/// A point-in-time view of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub index: usize,
    pub state: ChannelState,
    /// 0 when the channel is free.
    pub sound_id: u32,
    pub priority: i32,
    pub looped: bool,
}

impl ChannelSnapshot {
    pub fn is_free(&self) -> bool {
        self.state == ChannelState::Free
    }
}

/// What a completion did to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionOutcome {
    /// The completion belonged to a buffer that's since been flushed, or the channel
    /// was already free.
    Ignored,
    /// The sound was queued again.
    Looped,
    /// The channel is free.
    Freed,
}

/// One playback slot and the hardware resource behind it.
pub(crate) struct Channel {
    index: usize,
    resource: Box<dyn ChannelResource>,
    state: ChannelState,
    playing_sound_id: u32,
    priority: i32,
    looped: bool,
    /// The buffer being played, kept for looping.
    buffer: Option<PcmBuffer>,
    /// The queue generation of the current buffer. Completions from any other
    /// generation are stale.
    generation: u64,
}

impl Channel {
    pub(crate) fn new(index: usize, resource: Box<dyn ChannelResource>) -> Channel {
        Channel {
            index,
            resource,
            state: ChannelState::Free,
            playing_sound_id: 0,
            priority: FREE_PRIORITY,
            looped: false,
            buffer: None,
            generation: 0,
        }
    }

    pub(crate) fn is_free(&self) -> bool {
        self.state == ChannelState::Free
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn playing_sound_id(&self) -> u32 {
        self.playing_sound_id
    }

    pub(crate) fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            index: self.index,
            state: self.state,
            sound_id: self.playing_sound_id,
            priority: self.priority,
            looped: self.looped,
        }
    }

    fn mark_free(&mut self) {
        self.state = ChannelState::Free;
        self.playing_sound_id = 0;
        self.priority = FREE_PRIORITY;
        self.looped = false;
        self.buffer = None;
    }

    /// Frees the channel, then stops and flushes the hardware queue. The channel is free
    /// even if the hardware calls fail; the first failure is returned.
    pub(crate) fn halt(&mut self) -> Result<(), OutputError> {
        self.mark_free();
        let stopped = self.resource.set_play_state(PlayState::Stopped);
        let cleared = self.resource.clear().map(|generation| {
            self.generation = generation;
        });
        stopped.and(cleared)
    }

    /// Starts a sound on this channel. On failure the channel is left free.
    pub(crate) fn start(
        &mut self,
        sound_id: u32,
        buffer: PcmBuffer,
        level: i32,
        looped: bool,
        priority: i32,
    ) -> Result<(), OutputError> {
        if let Err(e) = self.queue(buffer.clone(), level) {
            if let Err(stop_err) = self.halt() {
                warn!(
                    channel = self.index,
                    err = %stop_err,
                    "Unable to stop channel after a failed start"
                );
            }
            return Err(e);
        }

        self.state = ChannelState::Playing;
        self.playing_sound_id = sound_id;
        self.priority = priority;
        self.looped = looped;
        self.buffer = Some(buffer);
        trace!(
            channel = self.index,
            sound_id,
            priority,
            looped,
            level,
            generation = self.generation,
            "Channel started"
        );
        Ok(())
    }

    fn queue(&mut self, buffer: PcmBuffer, level: i32) -> Result<(), OutputError> {
        self.resource.set_volume(level)?;
        self.generation = self.resource.clear()?;
        self.resource.enqueue(buffer)?;
        self.resource.set_play_state(PlayState::Playing)
    }

    /// Pauses a busy channel.
    pub(crate) fn pause(&mut self) -> Result<(), OutputError> {
        if self.is_free() {
            return Ok(());
        }
        self.resource.set_play_state(PlayState::Paused)?;
        self.state = ChannelState::Paused;
        Ok(())
    }

    /// Resumes a busy channel.
    pub(crate) fn resume(&mut self) -> Result<(), OutputError> {
        if self.is_free() {
            return Ok(());
        }
        self.resource.set_play_state(PlayState::Playing)?;
        self.state = ChannelState::Playing;
        Ok(())
    }

    /// Handles the hardware finishing a buffer of the given generation.
    pub(crate) fn on_complete(&mut self, generation: u64) -> CompletionOutcome {
        if self.is_free() || generation != self.generation {
            return CompletionOutcome::Ignored;
        }

        if !self.looped {
            self.mark_free();
            return CompletionOutcome::Freed;
        }

        let requeued = match &self.buffer {
            Some(buffer) => self
                .resource
                .enqueue(buffer.clone())
                .and_then(|_| self.resource.set_play_state(PlayState::Playing)),
            None => Err(OutputError::Operation {
                op: "enqueue",
                reason: "no buffer to loop".to_string(),
            }),
        };
        match requeued {
            Ok(()) => CompletionOutcome::Looped,
            Err(e) => {
                warn!(
                    channel = self.index,
                    sound_id = self.playing_sound_id,
                    err = %e,
                    "Unable to loop sound, freeing channel"
                );
                if let Err(e) = self.halt() {
                    warn!(channel = self.index, err = %e, "Unable to stop channel");
                }
                CompletionOutcome::Freed
            }
        }
    }

    /// Stops the hardware ahead of the resource being released.
    pub(crate) fn release(self) {
        if let Err(e) = self.resource.set_play_state(PlayState::Stopped) {
            warn!(channel = self.index, err = %e, "Unable to stop channel on release");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::output::mock::{MockOp, Output};
    use crate::output::OutputProvider;
    use crate::output::PcmFormat;

    use super::*;

    fn channel(output: &Output) -> Channel {
        let resource = output
            .create_channel(PcmFormat::default(), Box::new(|_| {}))
            .unwrap();
        Channel::new(output.created_channels() - 1, resource)
    }

    fn buffer() -> PcmBuffer {
        Arc::from(vec![0u8; 8])
    }

    #[test]
    fn test_start_and_complete() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);
        channel.start(7, buffer(), -100, false, 3).unwrap();

        let snapshot = channel.snapshot();
        assert_eq!(snapshot.state, ChannelState::Playing);
        assert_eq!(snapshot.sound_id, 7);
        assert_eq!(snapshot.priority, 3);
        assert_eq!(output.volume(0), Some(-100));
        assert_eq!(output.play_state(0), PlayState::Playing);
        assert_eq!(output.queued(0), 1);

        let generation = channel.generation;
        assert_eq!(channel.on_complete(generation), CompletionOutcome::Freed);
        assert!(channel.is_free());
        assert_eq!(channel.playing_sound_id(), 0);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);
        channel.start(1, buffer(), 0, false, 0).unwrap();
        let stale = channel.generation;
        channel.start(2, buffer(), 0, false, 0).unwrap();

        assert_eq!(channel.on_complete(stale), CompletionOutcome::Ignored);
        assert_eq!(channel.playing_sound_id(), 2);
    }

    #[test]
    fn test_looped_completion_requeues() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);
        channel.start(1, buffer(), 0, true, 0).unwrap();
        assert!(output.complete(0));

        assert_eq!(
            channel.on_complete(channel.generation),
            CompletionOutcome::Looped
        );
        assert_eq!(output.queued(0), 1);
        assert_eq!(output.enqueue_count(0), 2);
        assert_eq!(channel.playing_sound_id(), 1);
    }

    #[test]
    fn test_failed_loop_frees() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);
        channel.start(1, buffer(), 0, true, 0).unwrap();
        output.fail_next(0, MockOp::Enqueue);

        assert_eq!(
            channel.on_complete(channel.generation),
            CompletionOutcome::Freed
        );
        assert!(channel.is_free());
        assert_eq!(output.play_state(0), PlayState::Stopped);
    }

    #[test]
    fn test_failed_start_rolls_back() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);
        output.fail_next(0, MockOp::SetPlayState);

        assert!(channel.start(1, buffer(), 0, false, 5).is_err());
        assert!(channel.is_free());
        assert_eq!(channel.priority(), FREE_PRIORITY);
        assert_eq!(output.play_state(0), PlayState::Stopped);
        assert_eq!(output.queued(0), 0);
    }

    #[test]
    fn test_loop_without_buffer_frees() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);
        channel.start(1, buffer(), 0, true, 4).unwrap();
        channel.buffer = None;

        assert_eq!(
            channel.on_complete(channel.generation),
            CompletionOutcome::Freed
        );
        assert!(channel.is_free());
        assert_eq!(channel.priority(), FREE_PRIORITY);
        assert_eq!(output.play_state(0), PlayState::Stopped);
    }

    #[test]
    fn test_pause_and_resume() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);

        // Free channels are left alone.
        channel.pause().unwrap();
        assert_eq!(channel.snapshot().state, ChannelState::Free);

        channel.start(1, buffer(), 0, false, 0).unwrap();
        channel.pause().unwrap();
        assert_eq!(channel.snapshot().state, ChannelState::Paused);
        assert_eq!(output.play_state(0), PlayState::Paused);

        channel.resume().unwrap();
        assert_eq!(channel.snapshot().state, ChannelState::Playing);
        assert_eq!(output.play_state(0), PlayState::Playing);
    }

    #[test]
    fn test_release_stops_first() {
        let output = Output::initialized("mock");
        let mut channel = channel(&output);
        channel.start(1, buffer(), 0, false, 0).unwrap();
        channel.release();
        assert_eq!(output.released(0), (true, true));
    }
}
