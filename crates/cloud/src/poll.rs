//! Bounded fixed-interval polling.
//!
//! Every remote wait in this crate has the same shape: probe, sleep a
//! fixed interval, give up after a bounded number of attempts. The
//! deadline is the only way a loop ends early -- there is no external
//! cancellation signal. [`poll_until`] owns that loop once; probes
//! differ only in what they look at and how they classify the answer.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// Sleep dependency injected into polling loops.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `tokio::time::sleep`.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed interval and attempt ceiling for one polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Maximum number of probes before giving up.
    pub max_attempts: u32,
}

impl PollConfig {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// One probe's verdict inside a polling loop.
pub enum PollDecision<T, E> {
    /// Target condition reached; stop with this value.
    Ready(T),
    /// Not there yet; sleep and probe again.
    NotYet,
    /// Unrecoverable probe failure; stop immediately.
    Fatal(E),
}

/// How a polling loop ended without reaching its target.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// The attempt ceiling was reached first. Distinct from any failure
    /// the remote side reports: "we stopped waiting", not "it failed".
    #[error("gave up after {attempts} attempts ({waited:?} waited)")]
    DeadlineExceeded { attempts: u32, waited: Duration },

    /// The probe reported an unrecoverable failure.
    #[error("{0}")]
    Fatal(E),
}

/// Drive `probe` until it is ready, fatal, or the ceiling is reached.
///
/// The first probe runs immediately; the interval sleep happens between
/// attempts, so a loop with `max_attempts = n` probes n times and
/// sleeps n - 1 times. The probe receives the 1-based attempt number.
pub async fn poll_until<T, E, F, Fut>(
    config: PollConfig,
    sleeper: &dyn Sleeper,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollDecision<T, E>>,
{
    let mut waited = Duration::ZERO;

    for attempt in 1..=config.max_attempts {
        match probe(attempt).await {
            PollDecision::Ready(value) => return Ok(value),
            PollDecision::Fatal(err) => return Err(PollError::Fatal(err)),
            PollDecision::NotYet => {}
        }

        if attempt < config.max_attempts {
            sleeper.sleep(config.interval).await;
            waited += config.interval;
        }
    }

    Err(PollError::DeadlineExceeded {
        attempts: config.max_attempts,
        waited,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Test sleeper that records requested sleeps and returns at once.
    pub(crate) struct RecordingSleeper {
        pub slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub(crate) fn new() -> Self {
            Self {
                slept: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn sleep_count(&self) -> usize {
            self.slept.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn config(attempts: u32) -> PollConfig {
        PollConfig::new(Duration::from_secs(10), attempts)
    }

    #[tokio::test]
    async fn ready_on_first_probe_never_sleeps() {
        let sleeper = RecordingSleeper::new();
        let result: Result<u32, PollError<String>> =
            poll_until(config(5), &sleeper, |_| async { PollDecision::Ready(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(sleeper.sleep_count(), 0);
    }

    #[tokio::test]
    async fn ready_on_third_probe_sleeps_twice() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, PollError<String>> = poll_until(config(5), &sleeper, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 3 {
                    PollDecision::Ready(n)
                } else {
                    PollDecision::NotYet
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(sleeper.sleep_count(), 2);
    }

    #[tokio::test]
    async fn ceiling_yields_deadline_exceeded() {
        let sleeper = RecordingSleeper::new();
        let result: Result<(), PollError<String>> =
            poll_until(config(4), &sleeper, |_| async { PollDecision::NotYet }).await;
        assert_matches!(
            result,
            Err(PollError::DeadlineExceeded { attempts: 4, .. })
        );
        // No sleep after the final attempt.
        assert_eq!(sleeper.sleep_count(), 3);
    }

    #[tokio::test]
    async fn fatal_stops_immediately() {
        let sleeper = RecordingSleeper::new();
        let result: Result<(), PollError<String>> = poll_until(config(5), &sleeper, |_| async {
            PollDecision::Fatal("boom".to_string())
        })
        .await;
        assert_matches!(result, Err(PollError::Fatal(msg)) if msg == "boom");
        assert_eq!(sleeper.sleep_count(), 0);
    }

    #[tokio::test]
    async fn attempt_numbers_are_one_based() {
        let sleeper = RecordingSleeper::new();
        let seen = Mutex::new(Vec::new());
        let _: Result<(), PollError<String>> = poll_until(config(3), &sleeper, |attempt| {
            seen.lock().unwrap().push(attempt);
            async { PollDecision::NotYet }
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
