use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Health checker trait for nodes
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Check if the node is healthy
    async fn check(&self) -> Result<bool>;

    /// Get the timeout duration
    fn timeout(&self) -> Duration;
}

/// How a node is polled: up to `retries` attempts, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { attempts: u32 },
    Unhealthy { attempts: u32, last_error: Option<String> },
    Cancelled,
}

/// Poll at a fixed interval until the checker passes, the attempts run out,
/// or `cancel` fires. A check that errors or exceeds the policy timeout
/// counts as a failed attempt.
///
/// A check already in flight runs to completion (bounded by the policy
/// timeout); cancellation is observed before each attempt and while
/// sleeping between attempts.
pub async fn poll_until_healthy<C: HealthChecker + ?Sized>(
    checker: &C,
    policy: &HealthPolicy,
    cancel: &CancellationToken,
) -> HealthOutcome {
    let retries = policy.retries.max(1);
    let mut last_error = None;

    for attempt in 1..=retries {
        if cancel.is_cancelled() {
            return HealthOutcome::Cancelled;
        }
        let result = tokio::time::timeout(policy.timeout, checker.check()).await;

        match result {
            Ok(Ok(true)) => return HealthOutcome::Healthy { attempts: attempt },
            Ok(Ok(false)) => last_error = None,
            Ok(Err(e)) => last_error = Some(e.to_string()),
            Err(_) => last_error = Some(format!("check timed out after {:?}", policy.timeout)),
        }
        tracing::debug!(attempt, retries, "Health check attempt failed");

        // Don't sleep after the last attempt
        if attempt < retries {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return HealthOutcome::Cancelled,
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    HealthOutcome::Unhealthy {
        attempts: retries,
        last_error,
    }
}
