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

use std::future::Future;

use bytes::{Buf, Bytes, BytesMut};

use crate::{AppError, AppResult};

/// The inbound byte-stream capability the codec reads from.
///
/// `fill` may suspend the calling task until enough bytes arrived; bytes stay
/// buffered until they are explicitly released with `consume`.
pub trait StreamReader: Send {
    /// Returns at least `min_bytes` buffered bytes.
    ///
    /// Fails with `UnexpectedEof` if the stream ends first.
    fn fill(&mut self, min_bytes: usize) -> impl Future<Output = AppResult<&[u8]>> + Send;

    /// Releases the first `n` buffered bytes. `n` must not exceed what the
    /// last `fill` returned.
    fn consume(&mut self, n: usize);

    /// Bytes available without suspending.
    fn buffered(&self) -> usize;
}

/// The outbound byte-stream capability the codec writes to.
pub trait StreamWriter: Send {
    /// Queues `bytes`. May push queued data to the peer when the queue is large.
    fn write_all(&mut self, bytes: &[u8]) -> impl Future<Output = AppResult<()>> + Send;

    /// Pushes everything queued so far to the peer.
    fn flush(&mut self) -> impl Future<Output = AppResult<()>> + Send;

    /// Bytes queued but not yet handed to the peer.
    fn pending(&self) -> usize;
}

/// An in-memory message, e.g. a reply a client decodes after receiving it whole.
impl StreamReader for Bytes {
    async fn fill(&mut self, min_bytes: usize) -> AppResult<&[u8]> {
        if self.len() < min_bytes {
            return Err(AppError::UnexpectedEof {
                needed: min_bytes,
                available: self.len(),
            });
        }
        Ok(&self[..])
    }

    fn consume(&mut self, n: usize) {
        self.advance(n);
    }

    fn buffered(&self) -> usize {
        self.len()
    }
}

/// Encodes a message into memory, the client side counterpart of the
/// connection's outbound stream.
impl StreamWriter for BytesMut {
    async fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn pending(&self) -> usize {
        self.len()
    }
}
