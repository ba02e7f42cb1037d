use crate::adapter::console::error::ConsoleError;
use crate::adapter::console::state::AppState;
use crate::domain::model::quota::time_until_reset;
use crate::domain::model::{
    ActionOutcome, AdmissionState, Connectivity, ControllerPhase, ControllerSnapshot,
    CredentialPresence, Remediation, ResetCountdown, StepState,
};
use crate::domain::worker_api::Credentials;

pub const HELP: &str = "\
Commands:
  start                    start the worker
  stop                     stop the worker
  reset                    reset the account to idle
  refresh                  poll the backend now
  creds <email> <password> save job board credentials
  status                   show the current state
  help                     show this help
  quit                     shut down and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Reset,
    Refresh,
    SaveCredentials { email: String, password: String },
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Command>, ConsoleError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "reset" => Command::Reset,
            "refresh" => Command::Refresh,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "creds" => match (words.next(), words.next()) {
                (Some(email), Some(password)) => Command::SaveCredentials {
                    email: email.to_string(),
                    password: password.to_string(),
                },
                _ => return Err(ConsoleError::Usage("usage: creds <email> <password>".into())),
            },
            other => {
                return Err(ConsoleError::Usage(format!(
                    "unknown command {:?}, type `help`",
                    other
                )))
            }
        };

        if words.next().is_some() && !matches!(command, Command::SaveCredentials { .. }) {
            return Err(ConsoleError::Usage(format!("{} takes no arguments", name)));
        }
        Ok(Some(command))
    }
}

/// Run one command and return the text to print.
///
/// Action outcomes themselves are printed by the event forwarder; only the
/// follow-up hint is returned here.
pub async fn execute(state: &AppState, command: Command) -> Result<String, ConsoleError> {
    let controller = &state.controller;
    let outcome = match command {
        Command::Start => controller.start().await?,
        Command::Stop => controller.stop().await?,
        Command::Reset => controller.reset().await?,
        Command::SaveCredentials { email, password } => {
            controller
                .supply_credentials(Credentials { email, password })
                .await?
        }
        Command::Refresh => {
            controller.refresh()?;
            return Ok("refreshing...".to_string());
        }
        Command::Status => {
            return Ok(render_status(
                &controller.snapshot(),
                time_until_reset(state.clock.local_now()),
            ))
        }
        Command::Help => return Ok(HELP.to_string()),
        Command::Quit => return Ok(String::new()),
    };
    Ok(remediation_hint(&outcome).unwrap_or_default())
}

pub fn describe_outcome(action: &str, outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Accepted => format!("{}: accepted", action),
        ActionOutcome::Blocked { reason } => format!("{}: blocked, {}", action, reason.describe()),
        ActionOutcome::Rejected { message, .. } => format!("{}: rejected, {}", action, message),
        ActionOutcome::Unknown { message } => {
            format!("{}: no answer from the server ({})", action, message)
        }
    }
}

pub fn remediation_hint(outcome: &ActionOutcome) -> Option<String> {
    let hint = match outcome.remediation()? {
        Remediation::WaitForReset { resume_at } => format!(
            "  will be available again at {}",
            resume_at.format("%Y-%m-%d %H:%M")
        ),
        Remediation::SupplyCredentials => {
            "  add your job board login with `creds <email> <password>`".to_string()
        }
        Remediation::RetryLater => "  try again in a moment".to_string(),
        Remediation::Refresh => "  state may be stale, `refresh` to check".to_string(),
    };
    Some(hint)
}

pub fn render_status(snapshot: &ControllerSnapshot, countdown: ResetCountdown) -> String {
    let mut lines = Vec::new();
    let session = &snapshot.session;

    let status = serde_json::to_value(session.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let mut worker = format!("Worker:       {} ({}%)", status, session.progress);
    if !session.current_task.is_empty() {
        worker.push_str(&format!(" - {}", session.current_task));
    }
    lines.push(worker);

    if !session.detailed_steps.is_empty() {
        let steps = session
            .detailed_steps
            .iter()
            .map(|step| {
                let mark = match step.state {
                    StepState::Completed => "x",
                    StepState::Current => ">",
                    StepState::Pending => " ",
                };
                format!("[{}] {}", mark, step.name)
            })
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(format!("Steps:        {}", steps));
    }
    lines.push(format!(
        "Progress:     {} tasks, {} applications this run",
        session.tasks_completed, session.applications_submitted
    ));

    match &snapshot.quota {
        Some(quota) => lines.push(format!(
            "Quota:        {} plan, {}/{} used ({} left), resets in {}",
            quota.plan,
            quota.daily_usage,
            quota.daily_limit,
            quota.remaining(),
            countdown
        )),
        None => lines.push("Quota:        unknown".to_string()),
    }

    let admission = match &snapshot.admission {
        AdmissionState::Idle => "ready".to_string(),
        AdmissionState::CredentialCheck => "checking credentials".to_string(),
        AdmissionState::QuotaCheck => "checking quota".to_string(),
        AdmissionState::Dispatching => "starting".to_string(),
        AdmissionState::Blocked { reason } => format!("blocked - {}", reason.describe()),
    };
    lines.push(format!("Admission:    {}", admission));

    let credentials = match snapshot.credentials {
        CredentialPresence::Unknown => "unknown",
        CredentialPresence::Present => "saved",
        CredentialPresence::Missing => "missing",
    };
    lines.push(format!("Credentials:  {}", credentials));

    if let Connectivity::Degraded {
        consecutive_failures,
    } = snapshot.connectivity
    {
        lines.push(format!(
            "Connectivity: degraded ({} consecutive failures)",
            consecutive_failures
        ));
    }

    let summary = &snapshot.application_summary;
    let by_status = summary
        .by_status
        .iter()
        .map(|(status, count)| format!("{}: {}", status, count))
        .collect::<Vec<_>>()
        .join(", ");
    if by_status.is_empty() {
        lines.push(format!("Applications: {} recent", summary.total));
    } else {
        lines.push(format!("Applications: {} recent ({})", summary.total, by_status));
    }

    if let Some(action) = &snapshot.last_action {
        lines.push(format!(
            "Last action:  {}",
            describe_outcome(action.kind.as_str(), &action.outcome)
        ));
    }
    if snapshot.needs_refresh {
        lines.push("              (waiting for the server to confirm)".to_string());
    }
    match snapshot.phase {
        ControllerPhase::Active => {}
        ControllerPhase::SessionInvalid => {
            lines.push("Session expired; sign in again and restart.".to_string())
        }
        ControllerPhase::TornDown => lines.push("Controller stopped.".to_string()),
    }

    lines.join("\n")
}
