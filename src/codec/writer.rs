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

use integer_encoding::VarInt;

use super::{Primitive, StreamWriter, MAX_VARINT_LEN};
use crate::AppResult;

/// Typed cursor over a [`StreamWriter`].
pub struct BinaryWriter<'a, S: StreamWriter> {
    stream: &'a mut S,
}

impl<'a, S: StreamWriter> BinaryWriter<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        BinaryWriter { stream }
    }

    /// Bytes queued but not yet sent.
    pub fn pending(&self) -> usize {
        self.stream.pending()
    }

    pub async fn write<T: Primitive>(&mut self, value: T) -> AppResult<()> {
        let raw = value.to_raw();
        self.stream.write_all(raw.as_ref()).await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.stream.write_all(bytes).await
    }

    pub async fn write_varint(&mut self, value: u64) -> AppResult<()> {
        self.write_var(value).await
    }

    /// Zig-zag encoded signed varint.
    pub async fn write_signed_varint(&mut self, value: i64) -> AppResult<()> {
        self.write_var(value).await
    }

    pub async fn write_size(&mut self, size: usize) -> AppResult<()> {
        self.write_var(size as u64).await
    }

    /// A size prefixed blob.
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.write_size(bytes.len()).await?;
        self.stream.write_all(bytes).await
    }

    /// A size prefixed utf-8 string.
    pub async fn write_string(&mut self, value: &str) -> AppResult<()> {
        self.write_bytes(value.as_bytes()).await
    }

    pub async fn flush(&mut self) -> AppResult<()> {
        self.stream.flush().await
    }

    async fn write_var<V: VarInt + Send>(&mut self, value: V) -> AppResult<()> {
        let mut raw = [0u8; MAX_VARINT_LEN];
        let len = value.encode_var(&mut raw);
        self.stream.write_all(&raw[..len]).await
    }
}
