//! Bounded "wait until ready" loop with backoff and a hard deadline.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::BackendError;

/// Delay schedule between readiness attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay after every attempt.
    Fixed(Duration),
    /// `initial * factor^attempt`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

impl Backoff {
    /// Delay to sleep after the given (zero-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                max,
                factor,
            } => {
                let scaled = initial.as_nanos() as f64 * factor.max(1.0).powi(attempt.min(64) as i32);
                if !scaled.is_finite() || scaled >= max.as_nanos() as f64 {
                    max
                } else {
                    Duration::from_nanos(scaled as u64)
                }
            }
        }
    }
}

/// How long and how often to probe.
#[derive(Debug, Clone, Copy)]
pub struct ReadyPolicy {
    pub backoff: Backoff,
    pub deadline: Duration,
    /// Emit a progress line every N attempts (0 disables)
    pub report_every: u32,
}

impl ReadyPolicy {
    /// Probe once per `interval` until `deadline`.
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(interval),
            deadline,
            report_every: 30,
        }
    }

    pub fn with_report_every(mut self, attempts: u32) -> Self {
        self.report_every = attempts;
        self
    }
}

/// Outcome of a single readiness probe.
#[derive(Debug)]
pub enum Probe {
    Ready,
    /// Not ready yet; the string says why.
    Pending(String),
    /// Stop waiting, the target can never become ready.
    Failed(BackendError),
}

/// Run `probe` until it reports ready, fails, or the deadline passes.
///
/// Returns the number of attempts made. The loop never sleeps past the
/// deadline; the final attempt happens no later than `policy.deadline`.
pub async fn wait_until_ready<F, Fut>(policy: ReadyPolicy, mut probe: F) -> Result<u32, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    let started = Instant::now();
    let deadline = started + policy.deadline;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match probe().await {
            Probe::Ready => {
                debug!("Ready after {} attempt(s) in {:?}", attempt, started.elapsed());
                return Ok(attempt);
            }
            Probe::Failed(err) => return Err(err),
            Probe::Pending(reason) => {
                if policy.report_every > 0 && attempt % policy.report_every == 0 {
                    info!("Still waiting... (attempt {}) - {}", attempt, reason);
                } else {
                    debug!("Not ready (attempt {}): {}", attempt, reason);
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(BackendError::StartupTimeout(policy.deadline));
        }
        let delay = policy.backoff.delay(attempt - 1).min(deadline - now);
        sleep(delay).await;
    }
}
