use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status reported by the automation worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Stopped,
    Paused,
    Error,
    Completed,
}

impl WorkerStatus {
    /// No further progress is expected without a new explicit start
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Error)
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Completed,
    Current,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedStep {
    pub name: String,
    pub state: StepState,
}

impl DetailedStep {
    pub fn new(name: impl Into<String>, state: StepState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

/// Snapshot of the external automation job.
///
/// The server copy is authoritative: a polled snapshot replaces the local one
/// wholesale, it is never merged field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSession {
    pub status: WorkerStatus,
    #[serde(default)]
    pub current_task: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub tasks_completed: u32,
    #[serde(default)]
    pub applications_submitted: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detailed_steps: Vec<DetailedStep>,
}

impl WorkerSession {
    /// Idle defaults used before the first poll, after teardown and after an
    /// account reset.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Client-side placeholder written the moment a start passes the gate.
    ///
    /// The first step of `plan` is `current`, the rest are `pending`.
    pub fn placeholder_run(plan: &[String], started_at: DateTime<Utc>, last_run_at: Option<DateTime<Utc>>) -> Self {
        let detailed_steps = plan
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let state = if i == 0 {
                    StepState::Current
                } else {
                    StepState::Pending
                };
                DetailedStep::new(name.clone(), state)
            })
            .collect::<Vec<_>>();

        Self {
            status: WorkerStatus::Running,
            current_task: plan.first().cloned().unwrap_or_default(),
            progress: 0,
            tasks_completed: 0,
            applications_submitted: 0,
            started_at: Some(started_at),
            last_run_at,
            detailed_steps,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkerStatus::Running
    }

    /// Steps before the single `current` step are completed, steps after it
    /// are pending. A plan with no current step must be all-completed
    /// followed by all-pending.
    pub fn steps_well_formed(&self) -> bool {
        let mut seen_current = false;
        let mut seen_pending = false;
        for step in &self.detailed_steps {
            match step.state {
                StepState::Completed => {
                    if seen_current || seen_pending {
                        return false;
                    }
                }
                StepState::Current => {
                    if seen_current || seen_pending {
                        return false;
                    }
                    seen_current = true;
                }
                StepState::Pending => seen_pending = true,
            }
        }
        true
    }

    /// Name of the step currently executing, if any
    pub fn current_step(&self) -> Option<&str> {
        self.detailed_steps
            .iter()
            .find(|s| s.state == StepState::Current)
            .map(|s| s.name.as_str())
    }
}
