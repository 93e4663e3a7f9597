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

use tokio_util::sync::CancellationToken;

/// Listens for the shutdown signal of a context or of a single source.
///
/// The signal is level triggered: a `Shutdown` created after the signal fired
/// observes it immediately, so a connection accepted during shutdown cannot miss it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: Option<CancellationToken>,
}

impl Shutdown {
    pub fn new(notify: CancellationToken) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify: Some(notify),
        }
    }

    /// A signal that never fires, for streams that are not owned by a context.
    pub fn detached() -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify: None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
            || self
                .notify
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        match &self.notify {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
        self.is_shutdown = true;
    }
}
