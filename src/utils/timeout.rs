//! Async timeout helpers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for connecting to a server
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback heartbeat interval when a logon response carries none
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(9);

/// Await `fut`, mapping an elapsed deadline to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_elapsed_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = with_timeout_error(async { Ok(7) }, Duration::from_secs(1)).await;
        assert!(matches!(ok, Ok(7)));

        let err: Result<()> =
            with_timeout_error(async { Err(ProtocolError::NotConnected) }, Duration::from_secs(1)).await;
        assert!(matches!(err, Err(ProtocolError::NotConnected)));
    }
}
