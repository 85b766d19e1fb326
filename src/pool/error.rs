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
use crate::output::OutputError;

/// Error types for pool construction and channel control.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("at least one channel must be requested")]
    NoChannelsRequested,

    #[error("the audio output has not been initialized")]
    OutputNotInitialized,

    #[error("no channels could be created")]
    NoChannelsCreated,

    #[error("sample contains no audio")]
    EmptySample,

    #[error("output error: {0}")]
    Output(#[from] OutputError),
}
