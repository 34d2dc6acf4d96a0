use std::{fmt::Display, future::Future, time::Duration};

/// Fixed-delay retry policy applied around single network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Calls `operation` until it succeeds or the attempt limit is reached,
    /// sleeping `delay` between attempts. Returns the last error on exhaustion.
    ///
    /// `what` names the call in the per-attempt warnings; the terminal failure
    /// is left to the caller to report once.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(target: "server_log", "{} failed on attempt {}/{}: {}. Retrying in {}s...", what, attempt, max_attempts, e, self.delay.as_secs());
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
