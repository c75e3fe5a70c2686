//! Deterministic-time helpers for tests that exercise timeouts and
//! watch-activity timers (§4.2 "Timeout semantics", §4.9 "Watch-activity")
//! without sleeping in real time.
//!
//! Callers pair these with `#[tokio::test(start_paused = true)]`: the clock
//! only advances when [`advance`] is called, so a timeout test is exact
//! instead of racing a real sleep against scheduler jitter.

use std::time::Duration;

/// Advance the paused tokio clock by `duration`, yielding once first so any
/// task already polled to a timer registration observes the jump instead of
/// racing its own spawn.
pub async fn advance(duration: Duration) {
    tokio::task::yield_now().await;
    tokio::time::advance(duration).await;
    tokio::task::yield_now().await;
}

/// Advance in small steps, yielding between each, so interleaved timers
/// (e.g. a message timeout racing a watch-activity tick) fire in the order
/// their deadlines actually imply rather than all at once.
pub async fn advance_stepped(total: Duration, step: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() {
        let this_step = remaining.min(step);
        advance(this_step).await;
        remaining -= this_step;
    }
}
