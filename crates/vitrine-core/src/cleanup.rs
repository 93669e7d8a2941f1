//! Lease-expiry sweep
//!
//! Every running exhibit whose `last_accessed + lease` lies in the past is
//! stopped and cleaned up. Failures are isolated per exhibit; a failed stop
//! leaves the exhibit running so the next sweep retries it.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitrine_common::model::{Exhibit, ExhibitStatus};
use vitrine_common::{Context, Result, unix_now};

use crate::eventing::Eventing;
use crate::exhibit_service::ExhibitService;
use crate::provisioner::ApplicationProvisioner;

/// Outcome of one sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub expired: Vec<String>,
    pub cleaned: Vec<String>,
    pub failed: Vec<String>,
}

pub struct CleanupScheduler {
    exhibits: Arc<ExhibitService>,
    provisioner: Arc<dyn ApplicationProvisioner>,
    eventing: Eventing,
}

impl CleanupScheduler {
    pub fn new(
        exhibits: Arc<ExhibitService>,
        provisioner: Arc<dyn ApplicationProvisioner>,
        eventing: Eventing,
    ) -> Self {
        Self {
            exhibits,
            provisioner,
            eventing,
        }
    }

    fn is_expired(exhibit: &Exhibit, now: i64) -> Option<bool> {
        if exhibit.runtime_info.status != ExhibitStatus::Running {
            return Some(false);
        }
        match exhibit.lease_duration() {
            Ok(lease) => {
                let deadline = exhibit
                    .runtime_info
                    .last_accessed
                    .saturating_add(i64::try_from(lease.as_secs()).unwrap_or(i64::MAX));
                Some(now > deadline)
            }
            Err(e) => {
                warn!(exhibit_id = %exhibit.id, lease = %exhibit.lease, error = %e, "invalid lease, skipping");
                None
            }
        }
    }

    /// Sweep every exhibit once against `now` (unix seconds)
    pub async fn sweep(&self, ctx: &Context, now: i64) -> Result<SweepReport> {
        let exhibits = self.exhibits.get_all_exhibits(ctx).await?;
        let mut report = SweepReport {
            checked: exhibits.len(),
            ..Default::default()
        };

        for exhibit in exhibits {
            if Self::is_expired(&exhibit, now) != Some(true) {
                continue;
            }

            info!(
                exhibit_id = %exhibit.id,
                expired_by = now - exhibit.runtime_info.last_accessed,
                "exhibit lease expired"
            );
            report.expired.push(exhibit.id.clone());
            counter!("vitrine_lease_expired_total").increment(1);
            self.eventing.dispatch_lease_expired(&exhibit).await;

            if let Err(e) = self.provisioner.stop_application(ctx, &exhibit.id).await {
                warn!(exhibit_id = %exhibit.id, error = %e, "failed to stop expired exhibit");
                report.failed.push(exhibit.id);
                continue;
            }
            if let Err(e) = self.provisioner.cleanup_application(ctx, &exhibit.id).await {
                warn!(exhibit_id = %exhibit.id, error = %e, "failed to clean up expired exhibit");
                report.failed.push(exhibit.id);
                continue;
            }

            info!(exhibit_id = %exhibit.id, "exhibit cleaned up");
            report.cleaned.push(exhibit.id);
        }

        debug!(checked = report.checked, expired = report.expired.len(), "sweep finished");
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(interval = ?interval, "cleanup loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let ctx = Context::with_token(shutdown.child_token());
                    if let Err(e) = self.sweep(&ctx, unix_now()).await {
                        warn!(error = %e, "cleanup sweep failed");
                    }
                }
            }
        }

        info!("cleanup loop stopped");
    }
}
