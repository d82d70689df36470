//! Bounded polling

use std::future::Future;

use crate::config::PollPolicy;
use crate::error::Result;

/// Check up to `policy.attempts` times, sleeping `policy.delay` after each
/// negative check. Returns `Ok(true)` as soon as a check succeeds and
/// `Ok(false)` once the budget is spent. A check error aborts the poll.
pub async fn poll_bounded<F, Fut>(policy: PollPolicy, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for _ in 0..policy.attempts {
        if check().await? {
            return Ok(true);
        }
        tokio::time::sleep(policy.delay).await;
    }
    Ok(false)
}
