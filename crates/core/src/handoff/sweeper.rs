use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::domain::ticket::TicketId;
use crate::handoff::EscalationCoordinator;

/// One pass of the timeout sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Nothing was overdue.
    Idle,
    /// These tickets were closed for exceeding their deadline.
    Expired(Vec<TicketId>),
    /// The pass could not complete; the next tick retries.
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct SweepReport {
    pub swept_at: DateTime<Utc>,
    pub outcome: SweepOutcome,
}

/// Periodically expires escalations that waited past their deadline.
///
/// Each pass re-reads ticket status before closing, so a ticket resolved
/// between ticks is left untouched. A failed pass is logged and dropped;
/// the sweeper never takes the service down.
pub struct TimeoutSweeper {
    coordinator: Arc<EscalationCoordinator>,
}

impl TimeoutSweeper {
    pub fn new(coordinator: Arc<EscalationCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let outcome = match self.coordinator.expire_overdue(now).await {
            Ok(expired) if expired.is_empty() => {
                debug!(event_name = "sweeper.idle", "no overdue escalations");
                SweepOutcome::Idle
            }
            Ok(expired) => {
                info!(
                    event_name = "sweeper.expired",
                    count = expired.len(),
                    "closed overdue escalations"
                );
                SweepOutcome::Expired(expired)
            }
            Err(err) => {
                error!(event_name = "sweeper.pass_failed", error = %err, "sweep pass failed");
                SweepOutcome::Failed(err.to_string())
            }
        };

        SweepReport { swept_at: now, outcome }
    }
}
