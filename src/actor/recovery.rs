//! Panic recovery for actor callbacks.
//!
//! A panic inside one actor's handler is caught at the await point, logged, and
//! turned into an error so the runtime can stop that actor alone.

use crate::types::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Poll `future` to completion, converting a panic into `Error::Internal`.
pub async fn with_recovery_async<F, T>(future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                operation = operation_name,
                panic = %panic_msg,
                "async_panic_recovered"
            );

            Err(Error::internal(format!(
                "panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = with_recovery_async(async { Ok(42) }, "async_test").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_error_passes_through() {
        let result: Result<()> =
            with_recovery_async(async { Err(Error::bad_request("nope")) }, "async_test").await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_panic_after_await_is_caught() {
        let result: Result<()> = with_recovery_async(
            async {
                tokio::task::yield_now().await;
                panic!("{}", "handler exploded");
            },
            "handle",
        )
        .await;

        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("panic in handle"));
        assert!(msg.contains("handler exploded"));
    }

    #[test]
    fn test_extract_panic_message_str() {
        let payload = std::panic::catch_unwind(|| panic!("test message")).unwrap_err();
        assert_eq!(extract_panic_message(&payload), "test message");
    }
}
