//! Shared test fixtures: a deterministic clock and a scriptable processor,
//! used across the integration suites so each test only states what it
//! cares about (the delay before a job completes, or its outcome).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use taskforge_core::application::Processor;
use taskforge_core::domain::Job;
use taskforge_core::port::TimeProvider;

/// An `AtomicI64`-backed clock a test can advance explicitly, so timing
/// assertions don't depend on real wall-clock scheduling.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self(AtomicI64::new(start_millis))
    }

    pub fn advance(&self, delta_ms: i64) {
        self.0.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A `Processor` that sleeps `delay_ms` (real wall-clock time, so a
/// `Worker`'s background renewal/shutdown machinery observes it the way
/// it would a slow production job) then returns a fixed outcome, and
/// records every job id it was asked to process.
pub struct ScriptedProcessor {
    delay_ms: u64,
    outcome: ProcessorOutcome,
    seen: Mutex<Vec<String>>,
}

pub enum ProcessorOutcome {
    Succeed,
    Fail(String),
    Panic,
}

impl ScriptedProcessor {
    pub fn new(delay_ms: u64, outcome: ProcessorOutcome) -> Self {
        Self {
            delay_ms,
            outcome,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    async fn process(&self, job: &Job) -> Result<Value, String> {
        self.seen.lock().unwrap().push(job.id.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        match &self.outcome {
            ProcessorOutcome::Succeed => Ok(job.data.as_value().clone()),
            ProcessorOutcome::Fail(reason) => Err(reason.clone()),
            ProcessorOutcome::Panic => panic!("scripted processor panic"),
        }
    }
}
