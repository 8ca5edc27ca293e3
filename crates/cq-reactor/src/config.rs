// SPDX-License-Identifier: (MIT OR Apache-2.0)

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    /// Events fetched per `epoll_wait`.
    pub max_events: usize,
    /// Upper bound on bytes read for one `Read` completion.
    pub read_chunk: usize,
    /// Wait used by `Reactor::run` between shutdown checks. `None` blocks
    /// until an event or `Reactor::wake`.
    pub poll_timeout: Option<Duration>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_events: 64,
            read_chunk: 4096,
            poll_timeout: Some(Duration::from_millis(100)),
        }
    }
}
