//! Waiting for server-side operations to converge.
//!
//! Bundle pushes and rolling restarts run asynchronously on the master; the
//! only signal is a status string. Every wait in the crate goes through
//! [`wait_for_convergence`], parameterized by a [`ConvergenceRule`] and a
//! [`WaitPolicy`].

use crate::{Error, Result};
use shepherd_config::WaitPolicyConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Marker every in-flight status contains.
pub const IN_PROGRESS: &str = "in progress";

/// When a status snapshot counts as settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceRule {
    /// In progress while the status mentions the keyword and [`IN_PROGRESS`].
    Keyword(String),
    /// In progress while the status mentions [`IN_PROGRESS`]; two identical
    /// consecutive snapshots also count as settled.
    AnyActivity,
    /// Settled once two consecutive snapshots are identical.
    Unchanged,
}

impl ConvergenceRule {
    pub fn keyword(keyword: impl Into<String>) -> Self {
        ConvergenceRule::Keyword(keyword.into())
    }

    pub fn in_progress(&self, status: &str) -> bool {
        match self {
            ConvergenceRule::Keyword(keyword) => {
                status.contains(keyword.as_str()) && status.contains(IN_PROGRESS)
            }
            ConvergenceRule::AnyActivity => status.contains(IN_PROGRESS),
            ConvergenceRule::Unchanged => true,
        }
    }

    fn settled(&self, previous: &str, current: &str) -> bool {
        match self {
            ConvergenceRule::Keyword(_) => !self.in_progress(current),
            ConvergenceRule::AnyActivity => !self.in_progress(current) || previous == current,
            ConvergenceRule::Unchanged => previous == current,
        }
    }
}

/// Time budget of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn new(max_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            max_wait,
            poll_interval,
        }
    }

    pub fn from_secs(max_wait: u64, poll_interval: u64) -> Self {
        Self::new(Duration::from_secs(max_wait), Duration::from_secs(poll_interval))
    }

    /// Status queries allowed, the first one included.
    ///
    /// Floor division: a trailing partial interval is not waited. At least
    /// one query is always made.
    pub fn max_polls(&self) -> u32 {
        if self.poll_interval.is_zero() {
            return 1;
        }
        let polls = self.max_wait.as_millis() / self.poll_interval.as_millis().max(1);
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }
}

impl From<WaitPolicyConfig> for WaitPolicy {
    fn from(config: WaitPolicyConfig) -> Self {
        Self::new(config.max_wait(), config.poll_interval())
    }
}

/// Outcome of a wait that converged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    pub polls: u32,
    pub elapsed: Duration,
    pub status: String,
}

/// Polls `query` until `rule` considers the status settled.
///
/// An idle first snapshot returns at once without sleeping. Otherwise the
/// loop sleeps one interval per query until the status settles or
/// [`WaitPolicy::max_polls`] queries have been made, in which case
/// [`Error::ConvergenceTimeout`] carries the last status seen.
pub async fn wait_for_convergence<F, Fut>(
    operation: &str,
    rule: &ConvergenceRule,
    policy: WaitPolicy,
    mut query: F,
) -> Result<Converged>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let started = Instant::now();
    let max_polls = policy.max_polls();

    let mut status = query().await?;
    let mut polls = 1;
    tracing::debug!(operation, polls, status = %status, "polled status");

    if *rule != ConvergenceRule::Unchanged && !rule.in_progress(&status) {
        return Ok(Converged {
            polls,
            elapsed: started.elapsed(),
            status,
        });
    }

    tracing::info!(operation, "waiting for {operation} to finish");
    loop {
        if polls >= max_polls {
            let elapsed = started.elapsed();
            tracing::error!(operation, polls, ?elapsed, last_status = %status, "operation did not converge");
            return Err(Error::ConvergenceTimeout {
                operation: operation.to_string(),
                elapsed,
                polls,
                last_status: status,
            });
        }

        sleep(policy.poll_interval).await;
        let current = query().await?;
        polls += 1;
        tracing::debug!(operation, polls, status = %current, "polled status");

        let settled = rule.settled(&status, &current);
        status = current;
        if settled {
            let elapsed = started.elapsed();
            tracing::info!(operation, polls, ?elapsed, "{operation} finished");
            return Ok(Converged {
                polls,
                elapsed,
                status,
            });
        }
    }
}

/// Polls a counter until it has held the same value for `min_stable`.
///
/// Stability is measured from the first poll that saw the current value.
/// Gives up with [`Error::ConvergenceTimeout`] once `policy.max_wait` has
/// passed.
pub async fn wait_for_stable_count<F, Fut>(
    operation: &str,
    policy: WaitPolicy,
    min_stable: Duration,
    mut query: F,
) -> Result<u64>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let started = Instant::now();
    let mut count = query().await?;
    let mut seen_at = Instant::now();
    let mut polls = 1;

    loop {
        if seen_at.elapsed() >= min_stable {
            tracing::info!(operation, count, polls, "count is stable");
            return Ok(count);
        }

        if started.elapsed() >= policy.max_wait {
            tracing::error!(operation, count, polls, "count never settled");
            return Err(Error::ConvergenceTimeout {
                operation: operation.to_string(),
                elapsed: started.elapsed(),
                polls,
                last_status: count.to_string(),
            });
        }

        sleep(policy.poll_interval).await;
        let current = query().await?;
        polls += 1;
        if current != count {
            tracing::debug!(operation, previous = count, current, "count changed");
            count = current;
            seen_at = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn scripted(statuses: &[&str]) -> impl FnMut() -> std::future::Ready<Result<String>> {
        let statuses: Vec<String> = statuses.iter().map(|s| (*s).to_string()).collect();
        let mut index = 0;
        move || {
            let status = statuses[index.min(statuses.len() - 1)].clone();
            index += 1;
            std::future::ready(Ok(status))
        }
    }

    #[test]
    fn test_max_polls_floor_division() {
        assert_eq!(WaitPolicy::from_secs(180, 2).max_polls(), 90);
        assert_eq!(WaitPolicy::from_secs(7, 2).max_polls(), 3);
        assert_eq!(WaitPolicy::from_secs(1, 5).max_polls(), 1);
        assert_eq!(WaitPolicy::from_secs(0, 5).max_polls(), 1);
    }

    #[test]
    fn test_rule_matching() {
        let rule = ConvergenceRule::keyword("Rolling restart");
        assert!(rule.in_progress("Rolling restart in progress"));
        assert!(!rule.in_progress("Rolling restart: done"));
        assert!(!rule.in_progress("Bundle validation in progress"));
        assert!(ConvergenceRule::AnyActivity.in_progress("Bundle validation in progress"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_returns_without_sleeping() {
        let before = Instant::now();
        let calls = Cell::new(0);
        let result = wait_for_convergence(
            "Bundle validation",
            &ConvergenceRule::keyword("Bundle validation"),
            WaitPolicy::from_secs(180, 2),
            || {
                calls.set(calls.get() + 1);
                std::future::ready(Ok("Bundle validation: idle".to_string()))
            },
        )
        .await
        .unwrap();

        assert_eq!(result.polls, 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_polls() {
        let calls = Cell::new(0);
        let err = wait_for_convergence(
            "Rolling restart",
            &ConvergenceRule::keyword("Rolling restart"),
            WaitPolicy::from_secs(10, 2),
            || {
                calls.set(calls.get() + 1);
                std::future::ready(Ok("Rolling restart in progress".to_string()))
            },
        )
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 5);
        match err {
            Error::ConvergenceTimeout {
                operation,
                polls,
                last_status,
                elapsed,
            } => {
                assert_eq!(operation, "Rolling restart");
                assert_eq!(polls, 5);
                assert_eq!(last_status, "Rolling restart in progress");
                assert_eq!(elapsed, Duration::from_secs(8));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_third_poll() {
        let result = wait_for_convergence(
            "Bundle reload",
            &ConvergenceRule::keyword("X"),
            WaitPolicy::from_secs(60, 2),
            scripted(&["X in progress", "X in progress", "X done"]),
        )
        .await
        .unwrap();

        assert_eq!(result.polls, 3);
        assert_eq!(result.status, "X done");
        assert_eq!(result.elapsed, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_activity_settles_on_repeated_status() {
        let result = wait_for_convergence(
            "bundle events",
            &ConvergenceRule::AnyActivity,
            WaitPolicy::from_secs(480, 2),
            scripted(&["Bundle creation in progress", "Bundle reload in progress", "Bundle reload in progress"]),
        )
        .await
        .unwrap();

        assert_eq!(result.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_needs_two_identical_snapshots() {
        let result = wait_for_convergence(
            "apply bundle",
            &ConvergenceRule::Unchanged,
            WaitPolicy::from_secs(2250, 15),
            scripted(&["peer1 pending", "peer1 pending"]),
        )
        .await
        .unwrap();

        assert_eq!(result.polls, 2);
        assert_eq!(result.elapsed, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_error_propagates() {
        let err = wait_for_convergence(
            "apply bundle",
            &ConvergenceRule::AnyActivity,
            WaitPolicy::from_secs(10, 2),
            || {
                std::future::ready(Err(Error::Transport {
                    host: "idx1".to_string(),
                    reason: "connection reset".to_string(),
                }))
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_count_measures_from_first_observation() {
        let counts = [10u64, 20, 30, 30, 30, 30];
        let index = Cell::new(0usize);
        let count = wait_for_stable_count(
            "indexing",
            WaitPolicy::from_secs(120, 5),
            Duration::from_secs(10),
            || {
                let i = index.get();
                index.set(i + 1);
                std::future::ready(Ok(counts[i.min(counts.len() - 1)]))
            },
        )
        .await
        .unwrap();

        assert_eq!(count, 30);
        // 30 first seen on the third query, stable after two more intervals.
        assert_eq!(index.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_count_times_out_while_growing() {
        let next = Cell::new(0u64);
        let err = wait_for_stable_count(
            "indexing",
            WaitPolicy::from_secs(20, 5),
            Duration::from_secs(10),
            || {
                next.set(next.get() + 1);
                std::future::ready(Ok(next.get()))
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ConvergenceTimeout { .. }));
    }
}
