use std::time::Duration;

/// Whether a failed attempt should be retried or surfaced immediately.
///
/// Host-key mismatches, auth failures, and permission-denied errors are
/// `Terminal` in the collector's contract: retrying them wastes
/// time and, for host-key mismatches, is actively dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retry,
    Terminal,
}

/// Synchronous retry with exponential backoff and a classifier so callers
/// can opt specific error variants out of retrying entirely.
///
/// `initial_interval` doubles after each attempt, uncapped; callers pick
/// `max_attempts` small enough that this never matters in practice
/// (collector default: 3 attempts, 500ms initial).
pub fn retry<F, C, T, E>(
    max_attempts: usize,
    initial_interval: Duration,
    mut classify: C,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    C: FnMut(&E) -> Classification,
{
    let mut interval = initial_interval;
    let mut attempts = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;
                if attempts >= max_attempts || classify(&err) == Classification::Terminal {
                    return Err(err);
                }
                std::thread::sleep(interval);
                interval *= 2;
            }
        }
    }
}

/// Async counterpart used by the SSH collector and the bgpq4 batch runner,
/// both of which hold a `tokio` task per item rather than a dedicated
/// thread.
pub async fn retry_async<F, Fut, C, T, E>(
    max_attempts: usize,
    initial_interval: Duration,
    mut classify: C,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: FnMut(&E) -> Classification,
{
    let mut interval = initial_interval;
    let mut attempts = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;
                if attempts >= max_attempts || classify(&err) == Classification::Terminal {
                    return Err(err);
                }
                tokio::time::sleep(interval).await;
                interval *= 2;
            }
        }
    }
}
