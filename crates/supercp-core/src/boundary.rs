//! Failure boundary for mutating flows
//!
//! Every mutating service method runs its side effects as one wrapped
//! section. On failure the boundary logs the context and cause, runs the
//! compensation hook if one was given, and returns a uniform
//! [`OperationError`]. There is no retry here.

use std::future::Future;
use tracing::{error, warn};

use crate::error::{Error, OperationError};

/// Run a wrapped section with no compensation
pub async fn execute<T, A>(context: impl Into<String>, action: A) -> Result<T, OperationError>
where
    A: Future<Output = Result<T, Error>>,
{
    execute_with_rollback(context, action, |_| async {}).await
}

/// Run a wrapped section, awaiting `on_failure` with the cause message
/// before the error is returned
pub async fn execute_with_rollback<T, A, C, CF>(
    context: impl Into<String>,
    action: A,
    on_failure: C,
) -> Result<T, OperationError>
where
    A: Future<Output = Result<T, Error>>,
    C: FnOnce(String) -> CF,
    CF: Future<Output = ()>,
{
    let context = context.into();

    match action.await {
        Ok(value) => Ok(value),
        Err(cause) => {
            if cause.is_agent_unavailable() {
                warn!(
                    context = %context,
                    error = %cause,
                    "System agent is not running"
                );
            } else {
                error!(
                    context = %context,
                    error = %cause,
                    detail = ?cause,
                    "Operation failed"
                );
            }

            on_failure(cause.to_string()).await;
            Err(OperationError::new(context, cause))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn success_passes_value_through() {
        let calls = AtomicUsize::new(0);
        let value = execute_with_rollback(
            "Failed to do thing: x",
            async { Ok::<_, Error>(42) },
            |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_runs_rollback_once_with_cause() {
        let seen = std::sync::Mutex::new(Vec::new());
        let err = execute_with_rollback(
            "Failed to create mailbox: a@example.com",
            async { Err::<(), _>(Error::agent(-32000, "disk full")) },
            |cause| {
                seen.lock().unwrap().push(cause);
                async {}
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.context(), "Failed to create mailbox: a@example.com");
        assert_eq!(err.agent_error_code(), Some(-32000));
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("disk full"));
    }

    #[test]
    fn execute_returns_value_unchanged() {
        let pong = tokio_test::assert_ok!(tokio_test::block_on(execute(
            "Failed to ping system agent",
            async { Ok::<_, Error>("pong") },
        )));
        assert_eq!(pong, "pong");
    }

    #[tokio::test]
    async fn unavailable_is_flagged() {
        let err = execute(
            "Failed to list vhosts",
            async {
                Err::<(), _>(Error::from(TransportError::unavailable(
                    "/run/missing.sock",
                    "No such file or directory",
                )))
            },
        )
        .await
        .unwrap_err();

        assert!(err.is_agent_unavailable());
        assert!(err.to_string().contains("system agent is not running"));
    }
}
