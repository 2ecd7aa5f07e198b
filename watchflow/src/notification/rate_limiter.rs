//! Sliding-window rate limiting for notification channels.
//!
//! Each limited channel owns a [`ChannelBudget`]: a log of recent send
//! timestamps. A send is allowed while fewer than `max_count` sends fall
//! inside the trailing window.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

use super::events::ChannelKind;

/// Configuration for one channel's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Trailing window length in seconds.
    pub window_secs: u64,
    /// Maximum sends inside the window.
    pub max_count: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_count: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Sliding log of send timestamps for a channel.
#[derive(Debug)]
pub struct ChannelBudget {
    channel: ChannelKind,
    window: Duration,
    max_count: usize,
    sends: VecDeque<Instant>,
}

impl ChannelBudget {
    pub fn new(channel: ChannelKind, config: RateLimitConfig) -> Self {
        Self {
            channel,
            window: config.window(),
            max_count: config.max_count as usize,
            sends: VecDeque::with_capacity(config.max_count as usize),
        }
    }

    /// Record a send at `now` if the budget allows it.
    fn try_record(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.sends.len() < self.max_count {
            self.sends.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drop timestamps that fell out of the trailing window.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.sends.front() {
            if now.duration_since(oldest) >= self.window {
                self.sends.pop_front();
            } else {
                break;
            }
        }
    }

    fn remaining(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.max_count.saturating_sub(self.sends.len())
    }
}

/// Per-channel sliding-window rate limiter.
///
/// Channels without a configured budget are unlimited. The log channel is
/// never limited.
#[derive(Debug, Default)]
pub struct RateLimiter {
    budgets: Mutex<HashMap<ChannelKind, ChannelBudget>>,
}

impl RateLimiter {
    /// Create a limiter from per-channel configurations.
    pub fn new(configs: &BTreeMap<ChannelKind, RateLimitConfig>) -> Self {
        let budgets = configs
            .iter()
            .filter(|(channel, _)| **channel != ChannelKind::Log)
            .map(|(channel, config)| (*channel, ChannelBudget::new(*channel, *config)))
            .collect();
        Self {
            budgets: Mutex::new(budgets),
        }
    }

    /// Unlimited limiter.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Returns `true` and records the send if the channel is under budget.
    pub fn allow(&self, channel: ChannelKind) -> bool {
        if channel == ChannelKind::Log {
            return true;
        }

        let now = Instant::now();
        let mut budgets = self.budgets.lock();
        match budgets.get_mut(&channel) {
            Some(budget) => {
                let allowed = budget.try_record(now);
                trace!(channel = %budget.channel, allowed, "rate limit check");
                allowed
            }
            None => true,
        }
    }

    /// Remaining sends in the current window, `None` if unlimited.
    pub fn remaining(&self, channel: ChannelKind) -> Option<usize> {
        let now = Instant::now();
        self.budgets
            .lock()
            .get_mut(&channel)
            .map(|budget| budget.remaining(now))
    }

    pub fn is_limited(&self, channel: ChannelKind) -> bool {
        self.budgets.lock().contains_key(&channel)
    }
}
