use std::time::Duration;

use iop_wire::Priority;

/// Soft/hard activity watch timeouts (§4.9 "Watch-activity"). The soft
/// timeout fires an `Idle` event on expiry; a subsequent read cancels it and
/// fires `Active`. The hard timeout closes the connection. A `NOP` is
/// emitted every third of the smaller timeout to keep the peer's own
/// watch-activity timers from expiring.
#[derive(Debug, Clone, Copy)]
pub struct WatchActivity {
    pub soft: Option<Duration>,
    pub hard: Option<Duration>,
}

impl WatchActivity {
    pub const fn disabled() -> Self {
        Self { soft: None, hard: None }
    }

    pub(crate) fn keepalive_interval(&self) -> Option<Duration> {
        let smaller = match (self.soft, self.hard) {
            (Some(s), Some(h)) => s.min(h),
            (Some(s), None) => s,
            (None, Some(h)) => h,
            (None, None) => return None,
        };
        Some(smaller / 3)
    }
}

impl Default for WatchActivity {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Per-channel construction parameters (§10.4): no global mutable config,
/// matching the "no hidden singletons" design note of §9.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Delay before the first reconnect attempt after an unexpected
    /// disconnect (§4.9 "Connect").
    pub retry_delay: Duration,
    /// Whether a disconnect schedules a reconnect attempt at all.
    pub auto_reconnect: bool,
    /// Default priority this channel's own control traffic (BYE, NOP) is
    /// tagged with (§10.6 "Priority").
    pub priority: Priority,
    pub watch_activity: WatchActivity,
    /// Whether new outgoing messages may be enqueued. `false` until the
    /// channel reaches `Connected` (§3 "queuable flag").
    pub queuable: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(1000),
            auto_reconnect: true,
            priority: Priority::Normal,
            watch_activity: WatchActivity::disabled(),
            queuable: false,
        }
    }
}
