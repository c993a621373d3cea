//! Bounded retry of a fallible async operation.

use std::future::Future;

use tracing::warn;

/// Attempts made per chunk unless configured otherwise.
pub const DEFAULT_MAX_TRIES: u32 = 5;

/// Outcome of [`attempt`].
#[derive(Debug)]
pub enum Attempt<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: E },
}

impl<T, E> Attempt<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Attempt::Success { attempts, .. } | Attempt::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Attempt::Success { .. })
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Attempt::Success { value, .. } => Ok(value),
            Attempt::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Run `op` up to `max_tries` times, without delay between tries.
///
/// `op` receives the 1-based try number. `on_failure` runs after every failed
/// try, including the last one, before the next try starts. A `max_tries` of
/// zero is treated as one.
pub async fn attempt<T, E, F, Fut, C>(max_tries: u32, mut op: F, mut on_failure: C) -> Attempt<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E, u32),
    E: std::fmt::Display,
{
    let max_tries = max_tries.max(1);
    let mut try_number = 1;

    loop {
        match op(try_number).await {
            Ok(value) => {
                return Attempt::Success {
                    value,
                    attempts: try_number,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    attempt = try_number,
                    max_tries = max_tries,
                    "Attempt failed"
                );
                on_failure(&e, try_number);

                if try_number >= max_tries {
                    return Attempt::Exhausted {
                        attempts: try_number,
                        last_error: e,
                    };
                }
                try_number += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_success_after_failures() {
        let failures = RefCell::new(Vec::new());

        let outcome = attempt(
            5,
            |n| async move {
                if n < 3 {
                    Err(format!("try {}", n))
                } else {
                    Ok(n * 10)
                }
            },
            |e: &String, n| failures.borrow_mut().push((e.clone(), n)),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_result(), Ok(30));
        assert_eq!(
            failures.into_inner(),
            vec![("try 1".to_string(), 1), ("try 2".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_error() {
        let mut cleanups = 0;

        let outcome: Attempt<(), String> = attempt(
            5,
            |n| async move { Err(format!("try {}", n)) },
            |_, _| cleanups += 1,
        )
        .await;

        match outcome {
            Attempt::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(last_error, "try 5");
            }
            Attempt::Success { .. } => panic!("expected exhaustion"),
        }
        assert_eq!(cleanups, 5);
    }

    #[test]
    fn test_zero_tries_runs_once() {
        let outcome = tokio_test::block_on(attempt(0, |_| async { Ok::<_, String>(1) }, |_, _| {}));
        assert_eq!(outcome.attempts(), 1);
    }
}
