use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;

/// Capped exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_factor() -> f64 {
    1.5
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Budget for the raw-append fallback: same curve, twice the attempts.
    pub fn direct_append_default() -> Self {
        Self {
            max_attempts: 20,
            ..Self::default()
        }
    }

    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay_ms: 0,
            factor: 1.0,
            max_delay_ms: 0,
            max_attempts,
        }
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };
        let raw = self.initial_delay_ms as f64 * factor.powi(attempt.min(64) as i32);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds or the attempt budget is spent; returns the last error.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut(u32) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    debug!(op = label, attempt = attempt + 1, code = %e.code, "attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        let delay = self.delay_after(attempt);
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            AppError::new("RETRY_EXHAUSTED", "Retry budget exhausted").with_details(label.to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(0), Duration::from_millis(200));
        assert_eq!(p.delay_after(1), Duration::from_millis(300));
        assert_eq!(p.delay_after(2), Duration::from_millis(450));
        assert_eq!(p.delay_after(20), Duration::from_millis(2_000));
    }

    #[test]
    fn run_stops_at_first_success() {
        let p = RetryPolicy::immediate(5);
        let mut calls = 0;
        let out = p.run("t", |attempt| {
            calls += 1;
            if attempt < 2 {
                Err(AppError::new("X", "nope"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out, Ok(2));
        assert_eq!(calls, 3);
    }

    #[test]
    fn run_returns_last_error_when_exhausted() {
        let p = RetryPolicy::immediate(3);
        let err = p
            .run::<()>("t", |attempt| Err(AppError::new("X", format!("fail {attempt}"))))
            .expect_err("exhausted");
        assert_eq!(err.message, "fail 2");
    }
}
