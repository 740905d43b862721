//! Distribution loop, the single consumer of the broadcast queue.
//!
//! For each envelope: serialize once, snapshot the registry, and hand the
//! frame to every connection except the origin. A recipient whose write fails
//! is unregistered and closed; fan-out carries on with the rest.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::HubCounters;
use super::queue::{QueueReceiver, QueuedEnvelope};
use super::registry::ConnectionRegistry;
use crate::metrics::{DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL};

/// Outcome of fanning out one envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients a write was attempted for.
    pub attempted: usize,
    /// Writes that succeeded.
    pub delivered: usize,
    /// Writes that failed; those recipients were dropped.
    pub failed: usize,
}

/// Deliver one queued envelope to every registered connection but its origin.
pub async fn fan_out(
    registry: &ConnectionRegistry,
    item: &QueuedEnvelope,
    write_timeout: Duration,
) -> FanoutReport {
    let mut report = FanoutReport::default();
    let frame: Arc<str> = match item.envelope.to_frame() {
        Ok(frame) => frame.into(),
        Err(error) => {
            warn!(%error, "failed to serialize envelope, skipping");
            return report;
        }
    };

    for handle in registry.snapshot().await {
        if item.origin.excludes(handle.id()) {
            continue;
        }
        report.attempted += 1;
        match handle.deliver(frame.clone(), write_timeout).await {
            Ok(()) => report.delivered += 1,
            Err(error) => {
                report.failed += 1;
                warn!(
                    conn_id = %handle.id(),
                    peer = %handle.peer_addr(),
                    %error,
                    "delivery failed, dropping recipient"
                );
                let _ = registry.unregister(handle.id()).await;
                handle.close();
            }
        }
    }

    counter!(DELIVERIES_TOTAL).increment(report.delivered as u64);
    counter!(DELIVERY_FAILURES_TOTAL).increment(report.failed as u64);
    report
}

/// The hub's distribution task. Spawn [`run`](Self::run) once per process.
pub struct Distributor {
    pub(super) queue: QueueReceiver,
    pub(super) registry: Arc<ConnectionRegistry>,
    pub(super) write_timeout: Duration,
    pub(super) counters: Arc<HubCounters>,
    pub(super) cancel: CancellationToken,
}

impl Distributor {
    /// Run until cancelled or until every producer is gone.
    ///
    /// On cancellation the queue is closed and everything already queued is
    /// still delivered before returning.
    pub async fn run(self) {
        let Self {
            mut queue,
            registry,
            write_timeout,
            counters,
            cancel,
        } = self;

        info!("distribution loop started");
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = queue.recv() => next,
            };
            let Some(item) = next else {
                info!("broadcast queue closed, distribution loop stopped");
                return;
            };
            distribute(&registry, &counters, &item, write_timeout).await;
        }

        queue.close();
        let mut drained = 0usize;
        while let Some(item) = queue.recv().await {
            distribute(&registry, &counters, &item, write_timeout).await;
            drained += 1;
        }
        info!(drained, "distribution loop stopped");
    }
}

async fn distribute(
    registry: &ConnectionRegistry,
    counters: &HubCounters,
    item: &QueuedEnvelope,
    write_timeout: Duration,
) {
    let report = fan_out(registry, item, write_timeout).await;
    let _ = counters.distributed.fetch_add(1, Ordering::Relaxed);
    debug!(
        kind = %item.envelope.kind(),
        recipients = report.attempted,
        delivered = report.delivered,
        failed = report.failed,
        "envelope distributed"
    );
}
