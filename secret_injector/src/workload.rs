//! Workloads that can be forced to roll their pods
//!
//! Deployments, DaemonSets and StatefulSets are all redeployed the same way:
//! list them by label selector, then stamp a fresh value into a label of their
//! pod template. The controller sees a changed template and rolls the pods.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::{Error, REDEPLOY_LABEL, Result};

/// Identity of a listed workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

#[async_trait]
pub trait RedeployableWorkload: Send + Sync {
    /// Kind name used in logs and errors
    fn kind(&self) -> &'static str;

    /// Lists workloads of this kind in every namespace matching `selector`
    async fn list(&self, selector: &str) -> Result<Vec<WorkloadRef>>;

    /// Overwrites the redeploy label of the workload's pod template with `stamp`
    async fn redeploy(&self, workload: &WorkloadRef, stamp: &str) -> Result<()>;
}

/// Strategic merge patch that sets the redeploy label on the pod template
pub fn redeploy_patch(stamp: &str) -> Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "labels": { REDEPLOY_LABEL: stamp }
                }
            }
        }
    })
}

/// Kubernetes API adapter for one namespaced workload kind
pub struct KubeWorkload<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeWorkload<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> RedeployableWorkload for KubeWorkload<K>
where
    K: k8s_openapi::Resource<Scope = NamespaceResourceScope>
        + k8s_openapi::Metadata<Ty = ObjectMeta>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    fn kind(&self) -> &'static str {
        <K as k8s_openapi::Resource>::KIND
    }

    async fn list(&self, selector: &str) -> Result<Vec<WorkloadRef>> {
        let api: Api<K> = Api::all(self.client.clone());
        let params = ListParams::default().labels(selector);

        let list = api
            .list(&params)
            .await
            .map_err(|err| Error::fetch(self.kind(), err))?;

        Ok(list
            .items
            .iter()
            .map(|obj| WorkloadRef {
                kind: self.kind(),
                namespace: obj.namespace().unwrap_or_default(),
                name: obj.name_any(),
            })
            .collect())
    }

    async fn redeploy(&self, workload: &WorkloadRef, stamp: &str) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);

        api.patch(
            &workload.name,
            &PatchParams::default(),
            &Patch::Strategic(redeploy_patch(stamp)),
        )
        .await
        .map_err(|err| Error::WorkloadPatch {
            kind: workload.kind,
            namespace: workload.namespace.clone(),
            name: workload.name.clone(),
            source: Box::new(err),
        })?;

        Ok(())
    }
}

/// Adapters for every redeployable kind, in the order they are fanned out
pub fn workload_adapters(client: Client) -> Vec<Arc<dyn RedeployableWorkload>> {
    vec![
        Arc::new(KubeWorkload::<Deployment>::new(client.clone())),
        Arc::new(KubeWorkload::<DaemonSet>::new(client.clone())),
        Arc::new(KubeWorkload::<StatefulSet>::new(client)),
    ]
}
