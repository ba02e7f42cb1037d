mod action;
mod admission;
mod application;
mod polling;
pub mod quota;
mod session;
mod snapshot;

pub use action::{ActionKind, ActionOutcome, ActionRecord, CommandReply, RejectionCode, Remediation};
pub use admission::{AdmissionState, BlockReason, CredentialPresence};
pub use application::{ApplicationRecord, ApplicationSummary};
pub use polling::PollingPolicy;
pub use quota::{QuotaState, ResetCountdown};
pub use session::{DetailedStep, StepState, WorkerSession, WorkerStatus};
pub use snapshot::{Connectivity, ControllerPhase, ControllerSnapshot};
