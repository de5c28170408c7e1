//! Periodic sweep that closes conversations idle beyond the group threshold.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::close_flow::CloseWorkflow;
use crate::policy::PolicyProvider;
use crate::registry::{CloseResult, TicketRegistry};
use crate::ticket::ClosedBy;

/// Default time between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// What one sweep did. Failures are per ticket and never abort the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub closed: usize,
    pub failed: usize,
}

pub struct AutoCloseScheduler {
    registry: Arc<TicketRegistry>,
    close_flow: Arc<CloseWorkflow>,
    policies: Arc<dyn PolicyProvider>,
    interval: Duration,
}

impl AutoCloseScheduler {
    pub fn new(
        registry: Arc<TicketRegistry>,
        close_flow: Arc<CloseWorkflow>,
        policies: Arc<dyn PolicyProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            close_flow,
            policies,
            interval,
        }
    }

    /// Run sweeps until `shutdown` flips to true. An in-flight sweep finishes
    /// its current pass before stopping; there is no partial close.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(target: "modmail::sweep", "auto-close scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over all open tickets. Overlapping passes are harmless: the
    /// terminal close is idempotent, so a ticket swept twice closes once.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for ticket in self.registry.open_snapshot() {
            report.examined += 1;

            let policy = self.policies.policy(&ticket.key.group_id).await;
            if !policy.auto_close.enabled {
                continue;
            }
            if ticket.idle_for(now) < policy.auto_close.inactivity_threshold() {
                continue;
            }

            match self
                .close_flow
                .close_now(
                    &ticket.key,
                    ClosedBy::System,
                    Some("closed automatically after inactivity".into()),
                )
                .await
            {
                Ok(CloseResult::Closed(_)) => {
                    report.closed += 1;
                }
                Ok(CloseResult::AlreadyClosed) => {}
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: "modmail::sweep",
                        ticket = %ticket.key,
                        error = %error,
                        "auto-close failed, continuing sweep"
                    );
                }
            }
        }

        if report.closed > 0 || report.failed > 0 {
            tracing::info!(
                target: "modmail::sweep",
                examined = report.examined,
                closed = report.closed,
                failed = report.failed,
                "sweep finished"
            );
        }
        report
    }
}
