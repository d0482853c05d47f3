//! Retry Wrapper (§4.7): exponential backoff around a single model call,
//! journaling its attempts as custom entries once it either succeeds after
//! retrying or gives up.
//!
//! A call is retried only while it has yielded zero stream events — once
//! any token/tool-call/usage event has reached the caller, a mid-stream
//! failure is surfaced as-is rather than silently retried, since the
//! caller may already have partially rendered output downstream.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::json;

use sa_domain::config::RetryConfig;
use sa_domain::entry::custom_types;
use sa_domain::error::{Error, Result};

/// Outcome of one retry-wrapped attempt, reported by the caller so the
/// wrapper knows whether a failure happened before or after output began.
pub enum AttemptOutcome<T> {
    /// The attempt succeeded.
    Ok(T),
    /// The attempt failed before any output reached the caller — eligible
    /// for retry.
    RetryableErr(Error),
    /// The attempt failed after output had already started — not retried.
    NonRetryableErr(Error),
}

/// Journals a single retry attempt or a final give-up, for persistence by
/// the caller as a `Payload::Custom` entry.
#[derive(Debug, Clone)]
pub struct RetryJournalEntry {
    pub custom_type: &'static str,
    pub data: serde_json::Value,
}

/// Result of running [`with_retry`]: either the value, or a give-up
/// after exhausting attempts, alongside every journal entry to persist
/// in order.
pub struct RetryResult<T> {
    pub value: Result<T>,
    pub journal: Vec<RetryJournalEntry>,
}

/// Run `attempt` up to `cfg.max_retries + 1` times total, sleeping with
/// jittered exponential backoff between retryable failures.
///
/// `purpose` labels the journaled entries (e.g. `"llm_call"`, `"compaction"`)
/// so a reader can tell which retry wrapper instance produced them.
pub async fn with_retry<T, F, Fut>(cfg: &RetryConfig, purpose: &str, mut attempt: F) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let mut journal = Vec::new();
    let total_attempts = cfg.max_retries + 1;

    for n in 1..=total_attempts {
        match attempt(n).await {
            AttemptOutcome::Ok(value) => {
                return RetryResult {
                    value: Ok(value),
                    journal,
                };
            }
            AttemptOutcome::NonRetryableErr(e) => {
                return RetryResult {
                    value: Err(e),
                    journal,
                };
            }
            AttemptOutcome::RetryableErr(e) => {
                let is_last = n == total_attempts;
                if is_last {
                    tracing::warn!(purpose, attempt = n, error = %e, "retry wrapper giving up");
                    journal.push(RetryJournalEntry {
                        custom_type: custom_types::LLM_GIVE_UP,
                        data: json!({
                            "purpose": purpose,
                            "attempts": n,
                            "error": e.to_string(),
                        }),
                    });
                    return RetryResult {
                        value: Err(e),
                        journal,
                    };
                }

                let delay = jittered_delay(cfg, n);
                tracing::warn!(
                    purpose,
                    attempt = n,
                    next_delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retry wrapper retrying after failure"
                );
                journal.push(RetryJournalEntry {
                    custom_type: custom_types::LLM_RETRY,
                    data: json!({
                        "purpose": purpose,
                        "attempt": n,
                        "delay_ms": delay.as_millis() as u64,
                        "error": e.to_string(),
                    }),
                });
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("loop always returns by the final attempt")
}

fn jittered_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let base = cfg.backoff_for_attempt(attempt);
    if cfg.jitter <= 0.0 {
        return base;
    }
    let jitter_frac = cfg.jitter.clamp(0.0, 1.0);
    let base_ms = base.as_millis() as f64;
    let spread = base_ms * jitter_frac;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let jittered_ms = (base_ms + offset).max(0.0);
    Duration::from_millis(jittered_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_cfg() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_journal() {
        let cfg = fast_cfg();
        let result: RetryResult<i32> =
            with_retry(&cfg, "llm_call", |_| async { AttemptOutcome::Ok(42) }).await;
        assert_eq!(result.value.unwrap(), 42);
        assert!(result.journal.is_empty());
    }

    #[tokio::test]
    async fn retries_then_succeeds_journals_each_retry() {
        let cfg = fast_cfg();
        let calls = AtomicU32::new(0);
        let result: RetryResult<i32> = with_retry(&cfg, "llm_call", |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    AttemptOutcome::RetryableErr(Error::ModelStream("boom".into()))
                } else {
                    AttemptOutcome::Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.value.unwrap(), 7);
        assert_eq!(result.journal.len(), 1);
        assert_eq!(result.journal[0].custom_type, custom_types::LLM_RETRY);
    }

    #[tokio::test]
    async fn exhausts_retries_and_gives_up() {
        let cfg = fast_cfg();
        let result: RetryResult<i32> = with_retry(&cfg, "llm_call", |_| async {
            AttemptOutcome::RetryableErr(Error::ModelStream("always fails".into()))
        })
        .await;
        assert!(result.value.is_err());
        // max_retries=2 -> 3 total attempts -> 2 retry entries + 1 give-up entry.
        assert_eq!(result.journal.len(), 3);
        assert_eq!(
            result.journal.last().unwrap().custom_type,
            custom_types::LLM_GIVE_UP
        );
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let cfg = fast_cfg();
        let calls = AtomicU32::new(0);
        let result: RetryResult<i32> = with_retry(&cfg, "llm_call", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::NonRetryableErr(Error::ModelStream("mid-stream".into())) }
        })
        .await;
        assert!(result.value.is_err());
        assert!(result.journal.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
