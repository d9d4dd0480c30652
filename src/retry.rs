use std::future::Future;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Exponential backoff retry for transient store errors (spec §4.4, §7):
/// initial delay 1s, factor 2, up to `max_attempts` tries total. Returns the
/// last error, wrapped as `PersistentStore`, once attempts are exhausted.
pub async fn with_backoff<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => {
                return Err(EngineError::PersistentStore(format!(
                    "exhausted {max_attempts} attempts: {e}"
                )));
            }
            Err(_) => {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}
