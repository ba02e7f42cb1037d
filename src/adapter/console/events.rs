use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::adapter::console::commands::describe_outcome;
use crate::application::eventbus::SharedEventBus;
use crate::domain::event::{DomainEvent, SessionSource};
use crate::domain::model::Connectivity;

/// Start listening to the event bus and print notable events
pub fn start_event_forwarder(event_bus: SharedEventBus) -> JoinHandle<()> {
    let mut receiver = event_bus.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(line) = format_event(&event) {
                        println!("{}", line);
                    }
                    if matches!(event, DomainEvent::ControllerStopped) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Event forwarder lagged by {} events", n);
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Event bus closed, stopping forwarder");
                    break;
                }
            }
        }
    })
}

/// One line per event worth showing; ticks and raw snapshots are skipped.
pub fn format_event(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::SessionUpdated {
            session,
            source: SessionSource::Rollback,
        } => Some(format!("* worker state restored ({:?})", session.status).to_lowercase()),
        DomainEvent::SessionUpdated { .. } => None,
        DomainEvent::RunFinished { status } => {
            Some(format!("* run finished: {:?}", status).to_lowercase())
        }
        DomainEvent::QuotaUpdated { .. } => None,
        // Blocks are reported through the settled action
        DomainEvent::AdmissionChanged { .. } => None,
        DomainEvent::QuotaRestored { quota } => Some(format!(
            "* quota available again ({} left today)",
            quota.remaining()
        )),
        DomainEvent::ApplicationsRefreshed { summary } => {
            Some(format!("* {} recent applications", summary.total))
        }
        DomainEvent::ConnectivityChanged { connectivity } => Some(match connectivity {
            Connectivity::Online => "* backend reachable again".to_string(),
            Connectivity::Degraded {
                consecutive_failures,
            } => format!(
                "* backend unreachable ({} failed polls), retrying",
                consecutive_failures
            ),
        }),
        DomainEvent::ActionSettled { kind, outcome } => {
            Some(format!("* {}", describe_outcome(kind.as_str(), outcome)))
        }
        DomainEvent::CountdownTick { .. } => None,
        DomainEvent::ResetImminent { countdown } => {
            Some(format!("* quota resets in {}", countdown))
        }
        DomainEvent::SessionInvalidated => {
            Some("* session expired, sign in again to continue".to_string())
        }
        DomainEvent::ControllerStopped => Some("* controller stopped".to_string()),
    }
}
