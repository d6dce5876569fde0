use std::time::{Duration, Instant};

use crate::error::{Result, SupplyError};

/// Wait until `done` returns true or `timeout` expires. Sleeps in
/// `poll_interval` steps to avoid CPU spinning.
pub fn wait_until(
    mut done: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !done() {
        if Instant::now() >= deadline {
            return Err(SupplyError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}
