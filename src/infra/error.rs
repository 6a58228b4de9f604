//! Error taxonomy for the processing engine
//!
//! Transient failures (unreachable or slow backends) leave the affected
//! position unprocessed so the next run retries it. Malformed input is
//! logged and skipped.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend (registry, state store, event log, position source) failed
    #[error("{what} unavailable: {reason}")]
    Unavailable { what: &'static str, reason: String },

    /// A caller-supplied timeout elapsed
    #[error("{what} timed out after {ms}ms")]
    Timeout { what: &'static str, ms: u64 },

    /// Position is missing or has unusable coordinates
    #[error("malformed position {id}: {reason}")]
    MalformedPosition { id: String, reason: String },
}

impl EngineError {
    pub fn unavailable(what: &'static str, reason: impl std::fmt::Display) -> Self {
        EngineError::Unavailable { what, reason: reason.to_string() }
    }

    /// Retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Unavailable { .. } | EngineError::Timeout { .. })
    }
}

/// Run a backend call with a deadline, mapping elapsed time to `EngineError::Timeout`
pub async fn with_timeout<T, F>(what: &'static str, limit: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout { what, ms: limit.as_millis() as u64 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::unavailable("state_store", "connection refused").is_transient());
        assert!(EngineError::Timeout { what: "zone_registry", ms: 5000 }.is_transient());
        let malformed =
            EngineError::MalformedPosition { id: "p1".to_string(), reason: "missing lat".to_string() };
        assert!(!malformed.is_transient());
        assert_eq!(malformed.to_string(), "malformed position p1: missing lat");
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<(), _> = with_timeout("slow_call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(EngineError::Timeout { what: "slow_call", ms: 10 })));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout("fast_call", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
