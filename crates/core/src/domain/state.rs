// Job State (see spec.md 3.2, invariant I1)

use serde::{Deserialize, Serialize};

/// The container a job currently lives in.
///
/// A job id appears in exactly one of these at any instant (I1). `Paused`
/// is not a distinct job state but a queue-level container swap (the
/// `wait` <-> `paused` rename in the pause/resume scripts); jobs sitting
/// in `paused` are still logically `Waiting` and report that state to
/// callers, matching the original source's `getState()` behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    WaitingChildren,
    Completed,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::WaitingChildren => "waiting-children",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl JobState {
    /// Queue-keyspace suffix this state is stored under (see spec.md 3.1).
    pub fn keyspace_suffix(self) -> &'static str {
        match self {
            JobState::Waiting => "wait",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::WaitingChildren => "waiting-children",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}
