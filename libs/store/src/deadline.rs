use std::{future::Future, time::Duration};

use crate::StoreError;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a store or registry call under a deadline, mapping expiry to
/// [`StoreError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::with_deadline;
    use crate::StoreError;

    #[tokio::test]
    async fn expired_call_maps_to_timeout() {
        let result: Result<(), StoreError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let result: Result<(), StoreError> = with_deadline(Duration::from_secs(1), async {
            Err(StoreError::Unavailable("connection refused".to_string()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
