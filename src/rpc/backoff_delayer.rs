//! Delayer that increases delay time by a provided multiplier on each call.

use std::{future::Future, time::Duration};

use backoff::{backoff::Backoff, exponential::ExponentialBackoff, future::Retry};
use futures::{channel::oneshot, future::BoxFuture, FutureExt as _};

use crate::platform;

/// [`ExponentialBackoff`] without randomization, ticking on the platform
/// clock and sleeping with [`platform::delay_for`].
///
/// A `multiplier` below zero is considered as `0.0`. In that case every retry
/// after the first one fires immediately, so at most
/// [`MAX_IMMEDIATE_RETRIES`] of them are made in a row.
#[derive(Debug)]
pub struct BackoffDelayer {
    backoff: ExponentialBackoff<PlatformClock>,

    /// Number of zero delays given in a row.
    immediate_retries: u32,
}

/// Maximum number of retries in a row without any delay between them.
pub const MAX_IMMEDIATE_RETRIES: u32 = 10;

impl BackoffDelayer {
    /// Creates a new [`BackoffDelayer`].
    ///
    /// `max_interval` is capped by `max_elapsed_time`, and `initial_interval`
    /// is capped by the resulting `max_interval`.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
    ) -> Self {
        let max_interval = max_elapsed_time
            .map_or(max_interval, |max_elapsed| max_interval.min(max_elapsed));
        let initial_interval = initial_interval.min(max_interval);

        let backoff = ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: 0.0,
            multiplier: multiplier.max(0.0),
            max_interval,
            start_time: platform::now(),
            max_elapsed_time,
            clock: PlatformClock,
        };
        Self {
            backoff,
            immediate_retries: 0,
        }
    }

    /// Runs the provided `operation` until it succeeds, fails permanently or
    /// the `max_elapsed_time` runs out.
    ///
    /// The first attempt happens immediately.
    ///
    /// # Errors
    ///
    /// With the last error returned by the `operation`.
    pub async fn retry<Op, Fut, T, E>(self, operation: Op) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, backoff::Error<E>>>,
    {
        Retry::new(Sleeper, self, |_, _| {}, operation).await
    }
}

impl Backoff for BackoffDelayer {
    /// Never schedules an attempt past the `max_elapsed_time`.
    fn next_backoff(&mut self) -> Option<Duration> {
        let next = self.backoff.next_backoff()?;
        if let Some(max_elapsed) = self.backoff.max_elapsed_time {
            if self.backoff.get_elapsed_time() + next > max_elapsed {
                return None;
            }
        }
        if next == Duration::ZERO {
            self.immediate_retries += 1;
            if self.immediate_retries > MAX_IMMEDIATE_RETRIES {
                return None;
            }
        } else {
            self.immediate_retries = 0;
        }
        Some(next)
    }

    fn reset(&mut self) {
        self.backoff.reset();
        self.immediate_retries = 0;
    }
}

/// [`backoff::Clock`] reading [`platform::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformClock;

impl backoff::Clock for PlatformClock {
    #[inline]
    fn now(&self) -> std::time::Instant {
        platform::now()
    }
}

/// [`backoff::future::Sleeper`] backed by [`platform::delay_for`].
///
/// The delay runs as a separate local task, since the [`Sleeper`] must
/// return a [`Send`] future.
struct Sleeper;

impl backoff::future::Sleeper for Sleeper {
    type Sleep = BoxFuture<'static, ()>;

    fn sleep(&self, dur: Duration) -> Self::Sleep {
        let (tx, rx) = oneshot::channel();
        platform::spawn(async move {
            platform::delay_for(dur).await;
            let _ = tx.send(());
        });
        Box::pin(rx.map(drop))
    }
}

#[cfg(test)]
mod spec {
    use std::{cell::Cell, rc::Rc};

    use tokio::task::LocalSet;

    use super::*;

    fn delays(mut delayer: BackoffDelayer, n: usize) -> Vec<u128> {
        (0..n)
            .filter_map(|_| delayer.next_backoff())
            .map(|d| d.as_millis())
            .collect()
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn grows_delays_up_to_max() {
        let delayer = BackoffDelayer::new(
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(5),
            None,
        );

        assert_eq!(
            delays(delayer, 7),
            vec![500, 1000, 2000, 4000, 5000, 5000, 5000],
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn negative_multiplier_is_clamped_to_zero() {
        let delayer = BackoffDelayer::new(
            Duration::from_millis(500),
            -3.0,
            Duration::from_secs(5),
            None,
        );

        assert_eq!(delays(delayer, 3), vec![500, 0, 0]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn caps_immediate_retries() {
        let delayer = BackoffDelayer::new(
            Duration::from_millis(500),
            0.0,
            Duration::from_secs(5),
            None,
        );

        let delays = delays(delayer, 20);

        assert_eq!(delays.len(), 1 + MAX_IMMEDIATE_RETRIES as usize);
        assert!(delays[1..].iter().all(|d| *d == 0));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn intervals_are_capped_by_max_elapsed() {
        let delayer = BackoffDelayer::new(
            Duration::from_secs(10),
            2.0,
            Duration::from_secs(30),
            Some(Duration::from_secs(3)),
        );

        assert_eq!(delays(delayer, 1), vec![3000]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn first_attempt_is_immediate() {
        LocalSet::new()
            .run_until(async {
                let started = tokio::time::Instant::now();
                let attempts = Rc::new(Cell::new(0));

                let res: Result<(), ()> = BackoffDelayer::new(
                    Duration::from_millis(500),
                    2.0,
                    Duration::from_secs(5),
                    None,
                )
                .retry(|| {
                    let attempts = Rc::clone(&attempts);
                    async move {
                        attempts.set(attempts.get() + 1);
                        if attempts.get() < 3 {
                            Err(backoff::Error::Transient(()))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await;

                assert!(res.is_ok());
                assert_eq!(attempts.get(), 3);
                assert_eq!(started.elapsed(), Duration::from_millis(1500));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn gives_up_after_max_elapsed() {
        LocalSet::new()
            .run_until(async {
                let started = tokio::time::Instant::now();
                let attempts = Rc::new(Cell::new(0));

                let res: Result<(), u32> = BackoffDelayer::new(
                    Duration::from_millis(500),
                    1.0,
                    Duration::from_secs(5),
                    Some(Duration::from_secs(2)),
                )
                .retry(|| {
                    let attempts = Rc::clone(&attempts);
                    async move {
                        attempts.set(attempts.get() + 1);
                        Err(backoff::Error::Transient(attempts.get()))
                    }
                })
                .await;

                assert_eq!(res, Err(5));
                assert_eq!(attempts.get(), 5);
                assert!(started.elapsed() <= Duration::from_secs(2));
            })
            .await;
    }
}
