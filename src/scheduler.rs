//! Single-threaded scheduler loop: walks every device's poll list,
//! dispatches due polls, and reports how long the outer driver may
//! sleep before the next one comes due.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::Error;
use crate::queue::Command;
use crate::registry::Registry;

/// Used as the "no polls registered yet" fallback sleep, matching the
/// original's `INT_MAX` seconds placeholder; the wakeup channel is
/// what actually shortens this in practice.
const NO_POLLS_SLEEP: Duration = Duration::from_secs(i32::MAX as u64);

/// First two consecutive `TrySend` failures on a queue are logged
/// individually; the third promotes to a summary warning; after that,
/// failures are silent until a send succeeds.
const OVERFLOW_LOG_THRESHOLD: u32 = 2;
const OVERFLOW_SUMMARY_AT: u32 = 3;

/// Run one scheduler tick and return how long the caller may sleep
/// before the next poll becomes due.
pub async fn tick(registry: &Registry) -> Duration {
    let now = Instant::now();
    let mut next_deadline: Option<Instant> = None;

    for (polls, sender, overflow_streak) in registry.devices() {
        let mut guard = polls.lock().await;
        for poll in guard.iter_mut() {
            if now >= poll.next_read {
                match sender.try_send(Command::Poll(poll.snapshot())) {
                    Ok(()) => record_recovery(overflow_streak),
                    Err(Error::WouldBlock) => record_overflow(overflow_streak, &poll.topic),
                    Err(_) => {}
                }
                poll.next_read = now + poll.period.as_duration();
            }
            next_deadline = Some(match next_deadline {
                Some(d) if d <= poll.next_read => d,
                _ => poll.next_read,
            });
        }
    }

    match next_deadline {
        None => NO_POLLS_SLEEP,
        Some(deadline) => {
            let now2 = Instant::now();
            deadline.saturating_duration_since(now2)
        }
    }
}

fn record_overflow(streak: &AtomicU32, topic: &str) {
    let n = streak.fetch_add(1, Ordering::AcqRel) + 1;
    if n <= OVERFLOW_LOG_THRESHOLD {
        warn!(topic, streak = n, "poll queue full, dropping command");
    } else if n == OVERFLOW_SUMMARY_AT {
        warn!(
            topic,
            "poll queue repeatedly full, suppressing further warnings until it recovers"
        );
    }
}

fn record_recovery(streak: &AtomicU32) {
    let previous = streak.swap(0, Ordering::AcqRel);
    if previous > OVERFLOW_SUMMARY_AT {
        warn!("poll queue overflow recovered");
    }
}
