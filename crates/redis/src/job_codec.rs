// Redis hash -> Job decoding.
//
// Every job lives as a Redis hash, written field-by-field from Lua (see
// `scripts::add_job` and friends) so the scripts that mutate state never
// round-trip through this crate. This module only reads that hash back
// into a `Job`, the flat layout mirroring what the scripts write.

use std::collections::HashMap;

use serde_json::Value;

use taskforge_core::domain::{Job, JobOptions, JobPayload, JobState};
use taskforge_core::error::{AppError, Result};

pub fn decode_job(map: &HashMap<String, String>) -> Result<Job> {
    let get = |field: &str| -> Result<&String> {
        map.get(field)
            .ok_or_else(|| AppError::Store(format!("job hash missing field `{field}`")))
    };

    let data_value: Value = serde_json::from_str(get("data")?)?;
    let opts: JobOptions = serde_json::from_str(get("opts")?)?;
    let state: JobState = parse_state(get("state")?)?;
    let progress: Value = map
        .get("progress")
        .map(|s| serde_json::from_str(s))
        .transpose()?
        .unwrap_or(Value::Null);
    let stacktrace: Vec<String> = map
        .get("stacktrace")
        .map(|s| serde_json::from_str(s))
        .transpose()?
        .unwrap_or_default();
    let returnvalue: Option<Value> = map
        .get("returnvalue")
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::from_str(s))
        .transpose()?;

    Ok(Job {
        id: get("id")?.clone(),
        name: get("name")?.clone(),
        queue: get("queueName")?.clone(),
        data: JobPayload::new(data_value),
        opts,
        state,
        progress,
        attempts_made: parse_or(map.get("attemptsMade"), 0),
        returnvalue,
        failed_reason: non_empty(map.get("failedReason")),
        stacktrace,
        timestamp: parse_or(map.get("timestamp"), 0),
        delay: parse_or(map.get("delay"), 0),
        processed_on: map.get("processedOn").and_then(|s| s.parse().ok()),
        finished_on: map.get("finishedOn").and_then(|s| s.parse().ok()),
        parent_key: non_empty(map.get("parentKey")),
        rjk: non_empty(map.get("rjk")),
        stalled_counter: parse_or(map.get("stalledCounter"), 0),
    })
}

fn parse_state(raw: &str) -> Result<JobState> {
    match raw {
        "waiting" => Ok(JobState::Waiting),
        "active" => Ok(JobState::Active),
        "delayed" => Ok(JobState::Delayed),
        "waiting-children" => Ok(JobState::WaitingChildren),
        "completed" => Ok(JobState::Completed),
        "failed" => Ok(JobState::Failed),
        other => Err(AppError::Store(format!("unknown job state `{other}`"))),
    }
}

fn parse_or<T: std::str::FromStr + Default>(value: Option<&String>, default: T) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.is_empty()).cloned()
}
