//! Time-boxed provider calls

use super::InvokeError;
use crate::usage::UsageRecorder;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Run `call` with a time budget.
///
/// The call is spawned, so when the budget elapses the caller moves on while
/// the upstream request keeps running. Usage is recorded from inside the
/// spawned task whenever the call succeeds, including late successes the
/// caller already gave up on, so quota accounting matches what the provider
/// actually served.
pub async fn invoke_within<T, F, C>(
    budget: Duration,
    recorder: UsageRecorder,
    provider_id: String,
    tokens: C,
    call: F,
) -> Result<T, InvokeError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, InvokeError>> + Send + 'static,
    C: FnOnce(&T) -> u64 + Send + 'static,
{
    let id = provider_id.clone();
    let handle = tokio::spawn(async move {
        let result = call.await;
        if let Ok(value) = &result {
            recorder.record(&id, tokens(value)).await;
        }
        result
    });

    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(InvokeError::Provider(format!(
            "call to '{}' aborted: {}",
            provider_id, join_err
        ))),
        Err(_) => {
            warn!(provider = %provider_id, budget_ms = budget.as_millis() as u64, "Provider call timed out");
            debug!(provider = %provider_id, "Abandoned call left running for usage accounting");
            Err(InvokeError::Timeout(budget))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{today_key, MemoryUsageStore, UsageStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_success_records_tokens() {
        let store = Arc::new(MemoryUsageStore::new());
        let recorder = UsageRecorder::new(store.clone());

        let value = invoke_within(
            Duration::from_secs(1),
            recorder,
            "glm-4-free".into(),
            |n: &u64| *n,
            async { Ok::<u64, InvokeError>(42) },
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        let rec = store.get("glm-4-free", &today_key()).await.unwrap().unwrap();
        assert_eq!(rec.request_count, 1);
        assert_eq!(rec.token_count, 42);
    }

    #[tokio::test]
    async fn test_failure_records_nothing() {
        let store = Arc::new(MemoryUsageStore::new());
        let recorder = UsageRecorder::new(store.clone());

        let result = invoke_within(
            Duration::from_secs(1),
            recorder,
            "glm-4-free".into(),
            |_: &u64| 0,
            async { Err::<u64, _>(InvokeError::Provider("boom".into())) },
        )
        .await;

        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_abandoned_call_still_counts() {
        let store = Arc::new(MemoryUsageStore::new());
        let recorder = UsageRecorder::new(store.clone());

        let result = invoke_within(
            Duration::from_millis(10),
            recorder,
            "groq-fast".into(),
            |_: &u64| 7,
            async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok::<u64, InvokeError>(1)
            },
        )
        .await;
        assert!(matches!(result, Err(InvokeError::Timeout(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let rec = store.get("groq-fast", &today_key()).await.unwrap().unwrap();
        assert_eq!(rec.request_count, 1);
        assert_eq!(rec.token_count, 7);
    }
}
