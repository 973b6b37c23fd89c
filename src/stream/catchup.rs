//! Reconciliation against the external read model.
//!
//! Run after a failed resume (and on a stream that starts without a cursor):
//! refresh the list view, the active resource, then at most `limit` other
//! resources with pending changes. A failing item is logged and skipped.

use tracing::{info, warn};

use crate::core::{ReadModel, ResourceId, ServerIdentity};

/// Outcome of one catch-up pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Whether the list view refreshed successfully.
    pub list_refreshed: bool,
    /// Resources refreshed successfully, active resource first.
    pub refreshed: Vec<ResourceId>,
    /// Number of refreshes that failed.
    pub failures: usize,
}

/// Run a bounded catch-up for `identity`.
pub async fn catch_up(
    read_model: &dyn ReadModel,
    identity: &ServerIdentity,
    limit: usize,
) -> CatchUpReport {
    let mut report = refresh_current(read_model, identity).await;
    let active = read_model.active_resource(identity);

    let pending = match read_model.pending_resources(identity).await {
        Ok(pending) => pending,
        Err(err) => {
            warn!(identity = %identity, error = %err, "catch-up: pending list failed, skipping");
            report.failures += 1;
            Vec::new()
        }
    };

    let extra: Vec<ResourceId> = pending
        .into_iter()
        .filter(|resource| Some(resource) != active.as_ref())
        .take(limit)
        .collect();
    for resource in extra {
        refresh_one(read_model, identity, resource, &mut report).await;
    }

    info!(
        identity = %identity,
        refreshed = report.refreshed.len(),
        failures = report.failures,
        "catch-up finished"
    );
    report
}

/// Refresh the list view and the active resource. One poll tick.
pub async fn refresh_current(read_model: &dyn ReadModel, identity: &ServerIdentity) -> CatchUpReport {
    let mut report = CatchUpReport::default();
    match read_model.refresh_list(identity).await {
        Ok(()) => report.list_refreshed = true,
        Err(err) => {
            warn!(identity = %identity, error = %err, "catch-up: list refresh failed, skipping");
            report.failures += 1;
        }
    }
    if let Some(active) = read_model.active_resource(identity) {
        refresh_one(read_model, identity, active, &mut report).await;
    }
    report
}

async fn refresh_one(
    read_model: &dyn ReadModel,
    identity: &ServerIdentity,
    resource: ResourceId,
    report: &mut CatchUpReport,
) {
    match read_model.refresh_resource(identity, &resource).await {
        Ok(()) => report.refreshed.push(resource),
        Err(err) => {
            warn!(identity = %identity, resource = %resource, error = %err, "catch-up: refresh failed, skipping");
            report.failures += 1;
        }
    }
}
