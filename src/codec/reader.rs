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

use bytes::{Bytes, BytesMut};
use integer_encoding::VarInt;

use super::{Primitive, StreamReader, MAX_VARINT_LEN};
use crate::{AppError, AppResult};

const DEFAULT_MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Typed cursor over a [`StreamReader`].
///
/// Every read suspends until the stream holds enough bytes, so a value that
/// straddles several socket reads is reassembled transparently.
pub struct BinaryReader<'a, S: StreamReader> {
    stream: &'a mut S,
    max_field_len: usize,
}

impl<'a, S: StreamReader> BinaryReader<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        BinaryReader {
            stream,
            max_field_len: DEFAULT_MAX_FIELD_LEN,
        }
    }

    /// Caps the length prefix accepted by `read_bytes` and `read_string`.
    pub fn with_max_field_len(mut self, max_field_len: usize) -> Self {
        self.max_field_len = max_field_len;
        self
    }

    /// Bytes that can be read without suspending.
    pub fn buffered(&self) -> usize {
        self.stream.buffered()
    }

    pub async fn read<T: Primitive>(&mut self) -> AppResult<T> {
        let raw = self.stream.fill(T::SIZE).await?;
        let value = T::from_raw(raw);
        self.stream.consume(T::SIZE);
        Ok(value)
    }

    /// Fills `buf` completely, looping over partial fills.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> AppResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let available = self.stream.fill(1).await.map_err(|e| match e {
                AppError::UnexpectedEof { .. } => AppError::UnexpectedEof {
                    needed: buf.len(),
                    available: filled,
                },
                other => other,
            })?;
            let n = available.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&available[..n]);
            self.stream.consume(n);
            filled += n;
        }
        Ok(())
    }

    pub async fn read_varint(&mut self) -> AppResult<u64> {
        self.read_var::<u64>().await
    }

    /// Zig-zag encoded signed varint.
    pub async fn read_signed_varint(&mut self) -> AppResult<i64> {
        self.read_var::<i64>().await
    }

    pub async fn read_size(&mut self) -> AppResult<usize> {
        let size = self.read_varint().await?;
        usize::try_from(size)
            .map_err(|_| AppError::MalformedProtocol(format!("size {} overflows usize", size)))
    }

    /// A size prefixed blob.
    pub async fn read_bytes(&mut self) -> AppResult<Bytes> {
        let len = self.read_field_len().await?;
        let mut body = BytesMut::zeroed(len);
        self.read_exact(&mut body).await?;
        Ok(body.freeze())
    }

    /// A size prefixed utf-8 string.
    pub async fn read_string(&mut self) -> AppResult<String> {
        let body = self.read_bytes().await?;
        String::from_utf8(body.to_vec())
            .map_err(|e| AppError::MalformedProtocol(format!("invalid utf-8 string: {}", e)))
    }

    async fn read_field_len(&mut self) -> AppResult<usize> {
        let len = self.read_size().await?;
        if len > self.max_field_len {
            return Err(AppError::MalformedProtocol(format!(
                "field of length {} is too large, limit is {}",
                len, self.max_field_len
            )));
        }
        Ok(len)
    }

    // Grows the requested window one byte at a time until it holds a terminating
    // byte, so a varint never forces the stream to read past its own end.
    async fn read_var<V: VarInt + Send>(&mut self) -> AppResult<V> {
        let mut wanted = 1;
        loop {
            let available = self.stream.fill(wanted).await?;
            let window = &available[..available.len().min(MAX_VARINT_LEN)];
            if let Some((value, read_size)) = V::decode_var(window) {
                if read_size == MAX_VARINT_LEN && window[MAX_VARINT_LEN - 1] > 1 {
                    return Err(AppError::MalformedProtocol(
                        "varint overflows 64 bits".to_string(),
                    ));
                }
                self.stream.consume(read_size);
                return Ok(value);
            }
            if window.len() >= MAX_VARINT_LEN {
                return Err(AppError::MalformedProtocol(format!(
                    "varint longer than {} bytes",
                    MAX_VARINT_LEN
                )));
            }
            wanted = window.len() + 1;
        }
    }
}
