//! Property-based tests for retry decisions

use panelgen::error::BackendError;
use panelgen::retry::{RetryDecision, RetryPolicy, RetryState};
use proptest::prelude::*;
use std::time::Duration;

/// Validation failures are never retried, whatever the attempt count
#[test]
fn test_validation_never_retried_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let policy = RetryPolicy::default();

    runner
        .run(&(0u32..10, any::<String>()), |(attempt, message)| {
            let state = RetryState {
                attempt,
                last_rate_limit_delay: None,
            };
            prop_assert_eq!(
                policy.decide(&state, &BackendError::Validation(message)),
                RetryDecision::Stop
            );
            Ok(())
        })
        .unwrap();
}

/// Successive rate-limit delays never shrink, even when the hint does
#[test]
fn test_rate_limit_delays_non_decreasing_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let policy = RetryPolicy::default().with_max_attempts(16);

    runner
        .run(
            &proptest::collection::vec(proptest::option::of(0u64..120), 1..10),
            |hints| {
                let mut state = RetryState::default();
                let mut previous = Duration::ZERO;
                for hint in hints {
                    state.attempt += 1;
                    let error = BackendError::RateLimited {
                        message: "slow down".to_string(),
                        retry_after: hint.map(Duration::from_secs),
                    };
                    match policy.decide(&state, &error) {
                        RetryDecision::RetryAfter(delay) => {
                            prop_assert!(delay >= previous);
                            prop_assert!(delay >= policy.rate_limit_buffer);
                            previous = delay;
                            state.last_rate_limit_delay = Some(delay);
                        }
                        RetryDecision::Stop => prop_assert!(false, "stopped early"),
                    }
                }
                Ok(())
            },
        )
        .unwrap();
}

/// Retryable failures stop exactly at the attempt limit
#[test]
fn test_attempt_limit_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(1u32..8, 0u32..12), |(max_attempts, attempt)| {
            let policy = RetryPolicy::default().with_max_attempts(max_attempts);
            let state = RetryState {
                attempt,
                last_rate_limit_delay: None,
            };
            let decision = policy.decide(&state, &BackendError::Transient("503".to_string()));
            if attempt >= max_attempts {
                prop_assert_eq!(decision, RetryDecision::Stop);
            } else {
                prop_assert!(matches!(decision, RetryDecision::RetryAfter(_)));
            }
            Ok(())
        })
        .unwrap();
}
