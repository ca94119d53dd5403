use std::time::Duration as StdDuration;

use chrono::Duration;
use log::*;
use salon_engine::{events::EventProducers, BookingPolicy, PaymentFlowApi, SqliteDatabase};
use tokio::task::JoinHandle;

use crate::integrations::gateway::GatewayAdapter;

/// Starts the reconciliation worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Every `interval`, payments that have been pending for longer than `older_than` are checked against the gateway,
/// and refunds the gateway has not yet accepted are sent again.
pub fn start_reconciliation_worker(
    db: SqliteDatabase,
    gateway: GatewayAdapter,
    policy: BookingPolicy,
    producers: EventProducers,
    interval: StdDuration,
    older_than: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        let api = PaymentFlowApi::new(db, gateway, policy, producers);
        info!("🕰️ Payment reconciliation worker started. Runs every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running payment reconciliation job");
            match api.reconcile(older_than).await {
                Ok(report) if report.errors.is_empty() => info!("🕰️ Reconciliation finished. {report}"),
                Ok(report) => {
                    warn!("🕰️ Reconciliation finished with {} errors. {report}", report.errors.len());
                    debug!("🕰️ Reconciliation errors: {}", report.errors.join("; "));
                },
                Err(e) => {
                    error!("🕰️ Error running payment reconciliation job: {e}");
                },
            }
        }
    })
}
