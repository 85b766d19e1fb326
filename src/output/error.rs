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
/// Error types for output provider and channel resource operations
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Output provider is not initialized")]
    NotInitialized,

    #[error("Output provider is already initialized")]
    AlreadyInitialized,

    #[error("No more channels can be created")]
    ChannelLimit,

    #[error("Unsupported channel format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Channel operation '{op}' failed: {reason}")]
    Operation { op: &'static str, reason: String },
}
