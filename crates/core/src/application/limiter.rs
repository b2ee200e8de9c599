// Rate Limiter (spec.md 4.4)
//
// The token-bucket counter itself lives in the backing store (a
// `limiter`/`limiter:{group}` key incremented atomically by the
// `moveToActive` script); this module only resolves which bucket a job
// belongs to and how a worker should react to a limiter reply.

use crate::domain::{JobPayload, LimiterOptions};

/// Resolve the bucket key suffix for a job under the given limiter
/// config. `None` means the default (ungrouped) bucket.
///
/// Per spec.md 4.4/9: when `group_key` is set but the field is absent
/// from `data`, grouping is silently skipped and the job shares the
/// default bucket - this is the documented, intentional contract, not a
/// bug to special-case away.
pub fn bucket_group(limiter: &LimiterOptions, data: &JobPayload) -> Option<String> {
    let field = limiter.group_key.as_deref()?;
    data.group_value(field)
}

/// How the worker should react to a `RateLimited { delay_ms }` reply
/// from `moveToActive` (spec.md 4.3 step 3, 4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterReaction {
    /// Sleep locally, holding the concurrency slot, then retry
    /// `moveToActive` without the job ever leaving `delayed` via a
    /// second store round trip.
    HoldSlot { delay_ms: i64 },
    /// The job was already moved to `delayed` by the store; the worker
    /// just backs off before asking for more work.
    BackOff { delay_ms: i64 },
}

pub fn react(limiter: &LimiterOptions, delay_ms: i64) -> LimiterReaction {
    if limiter.worker_delay {
        LimiterReaction::HoldSlot { delay_ms }
    } else {
        LimiterReaction::BackOff { delay_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_key_present_resolves_bucket() {
        let limiter = LimiterOptions {
            max: 1,
            duration_ms: 1000,
            group_key: Some("tenant".into()),
            worker_delay: false,
        };
        let data = JobPayload::new(json!({"tenant": "acme"}));
        assert_eq!(bucket_group(&limiter, &data), Some("acme".to_string()));
    }

    #[test]
    fn missing_group_field_falls_back_to_default_bucket() {
        let limiter = LimiterOptions {
            max: 1,
            duration_ms: 1000,
            group_key: Some("tenant".into()),
            worker_delay: false,
        };
        let data = JobPayload::new(json!({"other": "field"}));
        assert_eq!(bucket_group(&limiter, &data), None);
    }
}
