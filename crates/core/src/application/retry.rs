// Retry / backoff logic (spec.md 4.1, moveToFailed)

use crate::domain::{BackoffPolicy, Job};

/// Decision returned by `RetryPolicy::should_retry`.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay_ms` (0 = reinsert into `wait` immediately).
    Retry { delay_ms: i64 },
    /// Max attempts reached; the job should move to `failed`.
    Exhausted,
}

/// Applies the job's own backoff policy, matching spec.md 4.1 exactly:
/// fixed uses a constant delay, exponential uses `base * 2^(attemptsMade - 1)`.
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn should_retry(job: &Job) -> RetryDecision {
        if job.attempts_made >= job.opts.attempts {
            return RetryDecision::Exhausted;
        }

        let delay_ms = match &job.opts.backoff {
            Some(policy) => policy.delay_ms(job.attempts_made),
            None => 0,
        };

        RetryDecision::Retry { delay_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobOptions, JobPayload};

    fn job_with(attempts_made: u32, attempts: u32, backoff: Option<BackoffPolicy>) -> Job {
        let mut opts = JobOptions {
            attempts,
            backoff,
            ..JobOptions::default()
        };
        opts.delay = 0;
        let mut job = Job::new("1", "test", "q", JobPayload::new(serde_json::json!({})), opts, 0);
        job.attempts_made = attempts_made;
        job
    }

    #[test]
    fn exhausted_when_attempts_made_reaches_limit() {
        let job = job_with(3, 3, None);
        assert_eq!(RetryPolicy::should_retry(&job), RetryDecision::Exhausted);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let job = job_with(2, 5, Some(BackoffPolicy::Fixed { delay_ms: 500 }));
        assert_eq!(
            RetryPolicy::should_retry(&job),
            RetryDecision::Retry { delay_ms: 500 }
        );
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let job = job_with(3, 5, Some(BackoffPolicy::Exponential { base_delay_ms: 100 }));
        // attemptsMade=3 => base * 2^(3-1) = 400
        assert_eq!(
            RetryPolicy::should_retry(&job),
            RetryDecision::Retry { delay_ms: 400 }
        );
    }
}
