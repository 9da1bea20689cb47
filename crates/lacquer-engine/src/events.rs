//! The progress event stream (spec.md §6): a typed event tagged with
//! one of {StepStarted, StepCompleted, StepFailed, StepRetrying,
//! StepSkipped, StepProgress}, delivered over a bounded channel that
//! the scheduler backpressures on rather than drops from.

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    StepStarted {
        step_id: String,
        step_index: usize,
        total_steps: usize,
    },
    StepProgress {
        step_id: String,
        step_index: usize,
        total_steps: usize,
        metadata: Option<Value>,
    },
    StepCompleted {
        step_id: String,
        step_index: usize,
        total_steps: usize,
        #[serde(with = "duration_ms")]
        duration: ChronoDuration,
    },
    StepFailed {
        step_id: String,
        step_index: usize,
        total_steps: usize,
        error: String,
    },
    StepRetrying {
        step_id: String,
        step_index: usize,
        total_steps: usize,
        attempt: u32,
        error: String,
    },
    StepSkipped {
        step_id: String,
        step_index: usize,
        total_steps: usize,
    },
}

mod duration_ms {
    use chrono::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_milliseconds())
    }
}

/// The channel capacity beyond which the scheduler's `send().await`
/// blocks dispatch rather than drop an event (spec.md §6: "dropping is
/// not allowed; backpressure pauses dispatch").
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

pub fn channel() -> (
    tokio::sync::mpsc::Sender<ProgressEvent>,
    tokio::sync::mpsc::Receiver<ProgressEvent>,
) {
    tokio::sync::mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY)
}
