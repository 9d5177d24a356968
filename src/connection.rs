// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis connection bootstrap with retry.
//!
//! The source and target Redis may still be starting when the anonymizer
//! comes up (compose files, rolling restarts), so the initial connection is
//! retried with exponential backoff before the process gives up.
//!
//! Once connected, the [`ConnectionManager`] reconnects on its own; a command
//! that fails mid-flight is still surfaced as a fatal error.

use crate::error::{AnonymizerError, Result};
use crate::metrics;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Configuration for connection retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of connection attempts.
    pub max_attempts: usize,

    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Ceiling for exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual connection attempt.
    pub connection_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Retry policy for process startup.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay     Cumulative
    /// -------  -----     ----------
    /// 1        500ms     500ms
    /// 2        750ms     1.25s
    /// 3        1.12s     2.38s
    /// ...
    /// 11       28.8s     85.5s
    /// 12-19    30s       325.5s
    /// ```
    ///
    /// The 20th failed attempt gives up, after about 5.5 minutes of waiting
    /// plus the per-attempt connection timeouts.
    pub fn startup() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.5,
            connection_timeout: Duration::from_secs(10),
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(500),
        }
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay = Duration::from_secs_f64(self.initial_delay.as_secs_f64() * multiplier);

        std::cmp::min(delay, self.max_delay)
    }
}

/// Open a [`ConnectionManager`] to `url`, retrying per `retry`.
///
/// `role` ("source" / "target") only labels logs and metrics.
pub async fn connect(role: &str, url: &str, retry: &RetryConfig) -> Result<ConnectionManager> {
    info!(role, url = %url, "Connecting to Redis");

    let client = Client::open(url)
        .map_err(|e| AnonymizerError::Config(format!("Invalid Redis URL {:?}: {}", url, e)))?;

    let mut attempt = 0;

    loop {
        attempt += 1;

        // Bound each attempt so an unreachable host cannot hang startup
        let failure = match timeout(retry.connection_timeout, client.get_connection_manager()).await
        {
            Ok(Ok(conn)) => {
                metrics::record_connection(role, true);
                if attempt > 1 {
                    info!(role, attempt, "Connected to Redis after retry");
                } else {
                    info!(role, "Connected to Redis");
                }
                return Ok(conn);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", retry.connection_timeout.as_millis()),
        };

        if attempt >= retry.max_attempts {
            metrics::record_connection(role, false);
            error!(role, attempt, error = %failure, "Failed to connect after max retries");
            return Err(AnonymizerError::redis_msg(
                "CONNECT",
                format!("{} connection failed after {} attempts: {}", role, attempt, failure),
            ));
        }

        let delay = retry.delay_for_attempt(attempt);
        warn!(
            role,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Connection attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_backoff_is_capped() {
        let retry = RetryConfig::startup();
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(750));
        assert_eq!(retry.delay_for_attempt(50), Duration::from_secs(30));
    }

    #[test]
    fn test_startup_total_wait() {
        let retry = RetryConfig::startup();
        let total: Duration = (1..retry.max_attempts).map(|a| retry.delay_for_attempt(a)).sum();
        assert!(total > Duration::from_secs(325), "got {:?}", total);
        assert!(total < Duration::from_secs(326), "got {:?}", total);
    }

    #[test]
    fn test_attempt_zero_uses_initial_delay() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), retry.initial_delay);
    }

    #[test]
    fn test_testing_config_is_fast() {
        let retry = RetryConfig::testing();
        let total: Duration = (1..retry.max_attempts).map(|a| retry.delay_for_attempt(a)).sum();
        assert!(total < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let err = connect("source", "not-a-url", &RetryConfig::testing())
            .await
            .err().unwrap();
        assert!(matches!(err, AnonymizerError::Config(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_gives_up() {
        let retry = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            connection_timeout: Duration::from_millis(200),
        };
        // Port 1 on localhost: refused or filtered, never a Redis
        let err = connect("target", "redis://127.0.0.1:1", &retry).await.err().unwrap();
        assert!(matches!(err, AnonymizerError::Redis { .. }));
        assert!(err.to_string().contains("2 attempts"));
    }
}
