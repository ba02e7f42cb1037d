use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::eventbus::SharedEventBus;
use crate::application::poller::PollerHandle;
use crate::application::reconciler::Reconciler;
use crate::domain::clock::SharedClock;
use crate::domain::event::DomainEvent;
use crate::domain::model::quota::time_until_reset;
use crate::domain::model::{ControllerPhase, QuotaState};

/// Display ticker for the time left until the quota resets.
///
/// Runs independently of the poller. When the quota is exhausted and the
/// reset is close it asks the poller to tighten its cadence, once per
/// approach.
pub struct CountdownEmitter {
    reconciler: Arc<Reconciler>,
    event_bus: SharedEventBus,
    poller: PollerHandle,
    clock: SharedClock,
    tick: Duration,
    lead: Duration,
    shutdown: CancellationToken,
}

impl CountdownEmitter {
    pub fn new(
        reconciler: Arc<Reconciler>,
        event_bus: SharedEventBus,
        poller: PollerHandle,
        clock: SharedClock,
        tick: Duration,
        lead: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            event_bus,
            poller,
            clock,
            tick,
            lead,
            shutdown,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut nudged = false;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.reconciler.snapshot();
            if snapshot.phase != ControllerPhase::Active {
                break;
            }

            let countdown = time_until_reset(self.clock.local_now());
            let quota_exhausted = snapshot
                .quota
                .as_ref()
                .map_or(false, QuotaState::is_exhausted);
            self.event_bus.publish(DomainEvent::CountdownTick {
                countdown,
                quota_exhausted,
            });

            let near_reset = quota_exhausted && countdown.as_duration() <= self.lead;
            if near_reset && !nudged {
                tracing::info!(remaining = %countdown, "Quota reset imminent");
                self.event_bus
                    .publish(DomainEvent::ResetImminent { countdown });
                self.poller.tighten_near_reset();
            }
            nudged = near_reset;
        }
        tracing::debug!("Countdown stopped");
    }
}
