//! Rotation reconciliation
//!
//! Each `SecretsRotationMapping` drives its own poll-act-ack cycle: receive a
//! batch of notifications, redeploy the mapped workloads once if any of them is
//! a matching value change, then delete what was handled. The kube `Controller` never runs
//! two reconciles of the same object at once, so cycles of one mapping never
//! overlap.
//!
//! Deletion happens only after the whole fan-out succeeded. A failed patch
//! leaves the batch in the queue and the next cycle redeploys again, which is
//! safe because stamping a new timestamp is idempotent.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use kube::ResourceExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::Context;
use crate::crd::{SecretsRotationMapping, SecretsRotationMappingSpec};
use crate::event::RotationEvent;
use crate::queue::{NotificationQueue, QueueMessage, ReceiveOptions};
use crate::workload::{RedeployableWorkload, WorkloadRef};
use crate::{Error, Result};

/// What a single cycle did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages returned by the poll
    pub received: usize,
    /// Workloads stamped with a new redeploy marker
    pub redeployed: Vec<WorkloadRef>,
    /// Messages deleted from the queue
    pub deleted: usize,
    /// Value-change messages left in the queue for other mappings
    pub skipped: usize,
}

/// Runs one poll-act-ack cycle for `mapping`
///
/// Fails without deleting anything when the poll, a workload list or a
/// workload patch fails. A failed batch delete is only logged since the
/// messages come back and are handled again.
pub async fn run_cycle(
    mapping: &SecretsRotationMappingSpec,
    queue: &dyn NotificationQueue,
    workloads: &[Arc<dyn RedeployableWorkload>],
    options: &ReceiveOptions,
) -> Result<CycleReport> {
    let messages = queue.receive(options).await?;

    let mut report = CycleReport {
        received: messages.len(),
        ..Default::default()
    };
    let mut handled: Vec<QueueMessage> = Vec::with_capacity(messages.len());
    let mut rotated = false;

    for message in messages {
        let event = match RotationEvent::decode(&message.body) {
            Ok(event) => event,
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "dropping undecodable message");
                handled.push(message);
                continue;
            }
        };

        if event.is_value_change() {
            if event.secret_id != mapping.secret_id {
                debug!(
                    message_id = %message.message_id,
                    secret_id = %event.secret_id,
                    "rotation for another secret, leaving in queue"
                );
                report.skipped += 1;
                continue;
            }

            info!(message_id = %message.message_id, secret_id = %event.secret_id, "secret value changed");
            rotated = true;
        }

        handled.push(message);
    }

    if rotated {
        report.redeployed = redeploy_all(mapping, workloads).await?;
    }

    if !handled.is_empty() {
        match queue.delete_batch(&handled).await {
            Ok(()) => report.deleted = handled.len(),
            Err(err) => warn!(error = %err, count = handled.len(), "failed to delete messages"),
        }
    }

    Ok(report)
}

/// Stamps every workload matching the mapping's selector, kind by kind
async fn redeploy_all(
    mapping: &SecretsRotationMappingSpec,
    workloads: &[Arc<dyn RedeployableWorkload>],
) -> Result<Vec<WorkloadRef>> {
    let selector = mapping.label_selector();
    let mut redeployed = Vec::new();

    for adapter in workloads {
        for workload in adapter.list(&selector).await? {
            let stamp = Utc::now().timestamp().to_string();
            adapter.redeploy(&workload, &stamp).await?;
            info!(
                kind = workload.kind,
                namespace = %workload.namespace,
                name = %workload.name,
                "redeployed workload"
            );
            redeployed.push(workload);
        }
    }

    Ok(redeployed)
}

/// Reconciles one mapping and schedules the next cycle
pub async fn reconcile(mapping: Arc<SecretsRotationMapping>, ctx: Arc<Context>) -> Result<Action> {
    let interval = mapping.spec.requeue_interval(ctx.default_interval);
    let span = info_span!(
        "rotation_cycle",
        mapping = %mapping.name_any(),
        namespace = %mapping.namespace().unwrap_or_default(),
    );

    let report = run_cycle(&mapping.spec, ctx.queue.as_ref(), &ctx.workloads, &ctx.receive)
        .instrument(span)
        .await?;

    if report.received > 0 {
        info!(
            mapping = %mapping.name_any(),
            received = report.received,
            redeployed = report.redeployed.len(),
            deleted = report.deleted,
            skipped = report.skipped,
            "rotation cycle finished"
        );
    }

    Ok(Action::requeue(interval))
}

/// Requeues a failed cycle after the mapping's regular interval
pub fn error_policy(mapping: Arc<SecretsRotationMapping>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(mapping = %mapping.name_any(), error = %err, "rotation cycle failed");
    Action::requeue(mapping.spec.requeue_interval(ctx.default_interval))
}

/// Starts the controller for every `SecretsRotationMapping` in the cluster
///
/// Runs until the process receives a shutdown signal.
pub async fn watch(ctx: Arc<Context>) {
    info!("starting rotation controller");

    let api = Api::<SecretsRotationMapping>::all(ctx.client.clone());
    Controller::new(api, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(err) = res {
                debug!(error = %err, "reconcile attempt failed");
            }
        })
        .await;
}
