// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded retry for commands on the layout-application channel.
//!
//! Only transient transport faults (connection loss, a timed-out command)
//! are retried; script and application errors are deterministic and
//! surface immediately. Backoff doubles from a base delay up to a cap,
//! with an equal-jitter split whose spread is derived from a per-operation
//! seed, so commands retrying at the same moment do not fall into
//! lockstep against the single plugin instance.
//!
//! The wall-clock budget bounds the whole operation: a backoff never
//! sleeps past it, the final backoff shrinks to whatever budget remains,
//! and once the budget is spent the *last transport error* is returned
//! unchanged so the scorecard keeps its error category. Every operation
//! yields a [`RetryTrace`] the client folds into the run audit.

use crate::McpError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry behaviour for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per operation, the first one included. `1` disables
    /// retries entirely.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds; doubles per retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff, in milliseconds.
    pub max_delay_ms: u64,
    /// Wall-clock budget across all attempts of one operation, in
    /// milliseconds.
    pub budget_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            budget_ms: 120_000,
        }
    }
}

/// What one retried operation actually did, in audit-embeddable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTrace {
    /// Command name the trace belongs to.
    pub command: String,
    /// Attempts made, the successful (or final failing) one included.
    pub attempts: u32,
    /// Total time spent sleeping between attempts.
    pub waited_ms: u64,
    /// The transient errors that triggered each retry, in order.
    pub errors: Vec<String>,
}

impl RetryTrace {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            attempts: 0,
            waited_ms: 0,
            errors: Vec::new(),
        }
    }

    /// `true` when the operation needed more than one attempt.
    #[must_use]
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

impl RetryPolicy {
    /// Drive `op` to completion under this policy.
    ///
    /// `op` receives the 1-based attempt number. `seed` feeds the jitter;
    /// callers derive it per operation so concurrent commands spread out.
    /// The trace is returned alongside the result in both outcomes, so
    /// failed operations still leave their retry history in the audit.
    pub async fn run<T, F, Fut>(
        &self,
        command: &str,
        seed: u64,
        mut op: F,
    ) -> (Result<T, McpError>, RetryTrace)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        let started = Instant::now();
        let mut trace = RetryTrace::new(command);
        loop {
            trace.attempts += 1;
            let err = match op(trace.attempts).await {
                Ok(value) => {
                    if trace.retried() {
                        debug!(
                            target: "press.mcp",
                            command,
                            attempts = trace.attempts,
                            waited_ms = trace.waited_ms,
                            "recovered after retry"
                        );
                    }
                    return (Ok(value), trace);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(target: "press.mcp", command, error = %err, "non-transient error, giving up");
                return (Err(err), trace);
            }
            if trace.attempts >= self.max_attempts.max(1) {
                warn!(
                    target: "press.mcp",
                    command,
                    attempts = trace.attempts,
                    error = %err,
                    "attempts exhausted"
                );
                return (Err(err), trace);
            }
            let remaining = Duration::from_millis(self.budget_ms).saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!(
                    target: "press.mcp",
                    command,
                    attempts = trace.attempts,
                    error = %err,
                    "retry budget spent, surfacing last error"
                );
                return (Err(err), trace);
            }

            // The final backoff shrinks to whatever budget is left.
            let delay = self.backoff(trace.attempts - 1, seed).min(remaining);
            warn!(
                target: "press.mcp",
                command,
                attempt = trace.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient fault, backing off"
            );
            trace.errors.push(err.to_string());
            trace.waited_ms += delay.as_millis() as u64;
            tokio::time::sleep(delay).await;
        }
    }

    /// Backoff after `retries_so_far` failed attempts: the doubled, capped
    /// delay split equal-jitter style, landing in `[cap/2, cap)`. The
    /// spread half is a pure function of `(seed, retries_so_far)`, so a
    /// given operation's schedule is reproducible while two concurrent
    /// operations diverge.
    fn backoff(&self, retries_so_far: u32, seed: u64) -> Duration {
        let doubled = self
            .base_delay_ms
            .saturating_mul(1u64 << retries_so_far.min(20));
        let capped = doubled.min(self.max_delay_ms).max(1);
        let half = capped / 2;
        let spread = mix(seed, retries_so_far) % (capped - half).max(1);
        Duration::from_millis(half + spread)
    }
}

/// SplitMix64 finalizer over the seed and retry index.
fn mix(seed: u64, retries_so_far: u32) -> u64 {
    let mut z = seed.wrapping_add(
        u64::from(retries_so_far + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15),
    );
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 1,
            max_delay_ms: 4,
            budget_ms: 5_000,
        }
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_stays_in_the_jitter_band() {
        let policy = quick();
        for retries in 0..8u32 {
            let cap = (1u64 << retries).min(policy.max_delay_ms).max(1);
            let delay = policy.backoff(retries, 42).as_millis() as u64;
            assert!(delay >= cap / 2, "retry {retries}: {delay} below band");
            assert!(delay < cap.max(2), "retry {retries}: {delay} above band");
        }
    }

    #[test]
    fn backoff_is_reproducible_per_seed() {
        let policy = quick();
        assert_eq!(policy.backoff(2, 7), policy.backoff(2, 7));
        assert_eq!(policy.backoff(3, 9), policy.backoff(3, 9));
    }

    #[tokio::test]
    async fn transient_faults_are_retried_and_traced() {
        let calls = AtomicU32::new(0);
        let (result, trace) = quick()
            .run("readDocumentInfo", 11, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(McpError::Disconnected)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(trace.attempts, 3);
        assert_eq!(trace.errors.len(), 2);
        assert!(trace.retried());
    }

    #[tokio::test]
    async fn script_errors_never_retry() {
        let calls = AtomicU32::new(0);
        let (result, trace): (Result<(), _>, _) = quick()
            .run("executeScript", 11, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(McpError::Script {
                        line: Some(3),
                        message: "boom".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(McpError::Script { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!trace.retried());
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_the_last_transport_error() {
        let (result, trace): (Result<(), _>, _) = quick()
            .run("exportPDF", 11, |_| async { Err(McpError::Disconnected) })
            .await;
        assert!(matches!(result, Err(McpError::Disconnected)));
        assert_eq!(trace.attempts, quick().max_attempts);
    }

    #[tokio::test]
    async fn spent_budget_stops_before_the_next_attempt() {
        let policy = RetryPolicy {
            budget_ms: 0,
            ..quick()
        };
        let (result, trace): (Result<(), _>, _) = policy
            .run("health", 11, |_| async { Err(McpError::Disconnected) })
            .await;
        assert!(matches!(result, Err(McpError::Disconnected)));
        assert_eq!(trace.attempts, 1);
        assert!(trace.errors.is_empty());
    }
}
