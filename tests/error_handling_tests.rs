//! # Error Handling Tests
//!
//! Tests for error classification and backoff calculation.
//!
//! These tests verify:
//! - Terminal vs retryable classification
//! - Backoff calculation using the Fibonacci sequence
//! - Error conversion from underlying libraries

use platform_controller::controller::backoff::FibonacciBackoff;
use platform_controller::error::Error;

#[test]
fn test_backoff_follows_fibonacci_sequence() {
    let mut backoff = FibonacciBackoff::new(1, 60);
    let observed: Vec<u64> = (0..8).map(|_| backoff.next_backoff().as_secs()).collect();
    assert_eq!(observed, vec![1, 1, 2, 3, 5, 8, 13, 21]);
}

#[test]
fn test_backoff_saturates_at_maximum() {
    let mut backoff = FibonacciBackoff::new(10, 45);
    let mut last = 0;
    for _ in 0..20 {
        last = backoff.next_backoff().as_secs();
        assert!(last <= 45, "backoff {last} exceeded the 45s ceiling");
    }
    assert_eq!(last, 45);
}

#[test]
fn test_readiness_backoff_starts_at_polling_interval() {
    let mut backoff = FibonacciBackoff::readiness();
    assert_eq!(backoff.next_backoff().as_secs(), 15);
}

#[test]
fn test_validation_errors_are_terminal() {
    let err = Error::Validation("organizationName is required".to_string());
    assert!(err.is_terminal());
    assert_eq!(err.metric_label(), "validation");
}

#[test]
fn test_retryable_errors_are_not_terminal() {
    for err in [
        Error::Render("unknown variable".to_string()),
        Error::Auth("HTTP 401".to_string()),
        Error::TransientIo("connection reset".to_string()),
        Error::Git("push rejected".to_string()),
    ] {
        assert!(!err.is_terminal(), "{err} must be retried, not parked");
    }
}

#[test]
fn test_json_errors_convert_to_serialization() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: Error = json_err.into();
    assert_eq!(err.metric_label(), "serialization");
    assert!(!err.is_terminal());
}

#[test]
fn test_error_messages_carry_context() {
    let err = Error::Git("git push failed: remote rejected".to_string());
    let rendered = err.to_string();
    assert!(rendered.contains("git error"));
    assert!(rendered.contains("remote rejected"));
}
