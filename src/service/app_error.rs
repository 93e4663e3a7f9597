// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::SocketAddr;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// lifecycle misuse, e.g. starting a stopped context
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// transport errors
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// framing errors
    #[error("malformed protocol: {0}")]
    MalformedProtocol(String),

    /// The peer closed its side while a value was only partially received.
    #[error("unexpected end of stream: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("fill of {requested} bytes exceeds the buffer ceiling of {ceiling} bytes")]
    FillTooLarge { requested: usize, ceiling: usize },

    /// The owning context or source is shutting down.
    #[error("connection is closing")]
    ConnectionClosing,
}

impl AppError {
    /// Errors that end a connection without indicating a fault on either side.
    pub fn is_closing(&self) -> bool {
        matches!(self, AppError::ConnectionClosing)
    }

    /// Short reads caused by the peer going away, as opposed to a socket fault.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, AppError::UnexpectedEof { .. })
    }
}
