use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use crate::queue::{NotificationQueue, ReceiveOptions};
use crate::workload::{RedeployableWorkload, workload_adapters};

/// Shared reconciler context
///
/// Holds only handles to external collaborators; every cycle re-derives its
/// state from the queue and the cluster.
#[derive(Clone)]
pub struct Context {
    /// Kube client
    pub client: Client,
    /// Queue carrying rotation notifications
    pub queue: Arc<dyn NotificationQueue>,
    /// Workload kinds fanned out to on a matching rotation
    pub workloads: Vec<Arc<dyn RedeployableWorkload>>,
    /// Poll parameters for each cycle
    pub receive: ReceiveOptions,
    /// Interval used by mappings that do not declare their own
    pub default_interval: Duration,
}

impl Context {
    /// Context redeploying Deployments, DaemonSets and StatefulSets through `client`
    pub fn new(client: Client, queue: Arc<dyn NotificationQueue>, default_interval: Duration) -> Self {
        Self {
            workloads: workload_adapters(client.clone()),
            client,
            queue,
            receive: ReceiveOptions::default(),
            default_interval,
        }
    }
}
