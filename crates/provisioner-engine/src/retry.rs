// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded local retry for status writes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(5),
        }
    }
}

/// Run `f` until it succeeds or the policy is exhausted.
///
/// Returns the last error after the final attempt; callers decide whether
/// that is fatal.
pub async fn retry_on_error<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    operation = operation,
                    attempt = attempt,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
