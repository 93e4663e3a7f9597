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

use std::mem::size_of;

use uuid::Uuid;

/// Fixed width values the codec moves as raw memory.
///
/// Values travel in the platform's native byte order and layout; both peers
/// must agree on it. This is a transport for in-memory values, not a portable
/// wire format.
pub trait Primitive: Sized + Send {
    const SIZE: usize;
    type Raw: AsRef<[u8]> + Send;

    fn to_raw(&self) -> Self::Raw;

    /// `raw` holds at least `SIZE` bytes.
    fn from_raw(raw: &[u8]) -> Self;
}

///
/// Implement Primitive for the numeric types through their native byte representation.
///
macro_rules! implement_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl Primitive for $t {
                const SIZE: usize = size_of::<$t>();
                type Raw = [u8; size_of::<$t>()];

                fn to_raw(&self) -> Self::Raw {
                    self.to_ne_bytes()
                }

                fn from_raw(raw: &[u8]) -> Self {
                    let mut bytes = [0u8; size_of::<$t>()];
                    bytes.copy_from_slice(&raw[..Self::SIZE]);
                    <$t>::from_ne_bytes(bytes)
                }
            }
        )*
    };
}

implement_primitive!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl Primitive for bool {
    const SIZE: usize = 1;
    type Raw = [u8; 1];

    fn to_raw(&self) -> Self::Raw {
        [u8::from(*self)]
    }

    fn from_raw(raw: &[u8]) -> Self {
        raw[0] != 0
    }
}

impl Primitive for Uuid {
    const SIZE: usize = 16;
    type Raw = [u8; 16];

    fn to_raw(&self) -> Self::Raw {
        *self.as_bytes()
    }

    fn from_raw(raw: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&raw[..Self::SIZE]);
        Uuid::from_bytes(bytes)
    }
}
