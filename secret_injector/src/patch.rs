//! JSON patch construction for secret injection
//!
//! The patch adds one init container that fetches the referenced secrets, one
//! memory-backed volume the init container writes into, and one read-only
//! mount per (container, secret reference) pair.
//!
//! Every list insertion follows the same rule: when the target list is absent
//! or empty in the original pod the whole list is set, otherwise the element is
//! appended with `/-`. Operations are applied in order, so only the first
//! insertion into a given list may create it.

use std::collections::BTreeMap;

use jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector, Pod, Volume,
    VolumeMount,
};
use serde::Serialize;
use serde_json::Value;

use crate::reference::{SecretReference, parse_references};
use crate::{
    ANNOTATION_SECRET_ARN, INIT_CONTAINER_MOUNT_PATH, INIT_CONTAINER_NAME, SECRET_ARN_ENV,
    SECRET_VOLUME_NAME, Error, Result,
};

const VOLUME_MEDIUM: &str = "Memory";

/// Snapshot of the parts of a pod the patch depends on
///
/// Built per admission request and never shared between requests.
#[derive(Debug, Clone, Default)]
pub struct PodMutationContext {
    pub annotations: BTreeMap<String, String>,
    pub containers: Vec<Container>,
    pub init_containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

impl From<Pod> for PodMutationContext {
    fn from(pod: Pod) -> Self {
        let spec = pod.spec.unwrap_or_default();
        Self {
            annotations: pod.metadata.annotations.unwrap_or_default(),
            containers: spec.containers,
            init_containers: spec.init_containers.unwrap_or_default(),
            volumes: spec.volumes.unwrap_or_default(),
        }
    }
}

impl PodMutationContext {
    /// Secret references declared on the pod, in annotation order
    pub fn secret_references(&self) -> Result<Vec<SecretReference>> {
        let annotation = self
            .annotations
            .get(ANNOTATION_SECRET_ARN)
            .map(String::as_str)
            .unwrap_or_default();
        parse_references(annotation)
    }

    /// Whether any init or application container already uses `name`
    pub fn has_container(&self, name: &str) -> bool {
        self.init_containers
            .iter()
            .chain(&self.containers)
            .any(|c| c.name == name)
    }
}

/// Builds the full injection patch for `pod`
///
/// Fails without returning a partial patch when any secret reference is malformed.
pub fn build_patch(pod: &PodMutationContext, init_image: &str) -> Result<Patch> {
    let references = pod.secret_references()?;

    let mut ops = Vec::with_capacity(2 + pod.containers.len() * references.len());

    ops.push(add_to_list(
        &["spec", "initContainers"],
        pod.init_containers.is_empty(),
        to_value(&init_container(init_image))?,
    ));

    ops.push(add_to_list(
        &["spec", "volumes"],
        pod.volumes.is_empty(),
        to_value(&secret_volume())?,
    ));

    let mounts = references
        .iter()
        .map(|r| to_value(&secret_mount(r)))
        .collect::<Result<Vec<_>>>()?;

    for (index, container) in pod.containers.iter().enumerate() {
        let index = index.to_string();
        let base = ["spec", "containers", index.as_str(), "volumeMounts"];
        let mut create = container
            .volume_mounts
            .as_ref()
            .is_none_or(|mounts| mounts.is_empty());

        for mount in &mounts {
            ops.push(add_to_list(&base, create, mount.clone()));
            create = false;
        }
    }

    Ok(Patch(ops))
}

/// Emits either a whole-list add or an append, depending on whether the
/// list must be created
fn add_to_list(base: &[&str], create: bool, value: Value) -> PatchOperation {
    let (path, value) = if create {
        (PointerBuf::from_tokens(base.iter().copied()), Value::Array(vec![value]))
    } else {
        let tokens = base.iter().copied().chain(std::iter::once("-"));
        (PointerBuf::from_tokens(tokens), value)
    };

    PatchOperation::Add(AddOperation { path, value })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(Error::SerializationError)
}

fn init_container(image: &str) -> Container {
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        volume_mounts: Some(vec![VolumeMount {
            name: SECRET_VOLUME_NAME.to_string(),
            mount_path: INIT_CONTAINER_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: SECRET_ARN_ENV.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: format!("metadata.annotations['{ANNOTATION_SECRET_ARN}']"),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn secret_volume() -> Volume {
    Volume {
        name: SECRET_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some(VOLUME_MEDIUM.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_mount(reference: &SecretReference) -> VolumeMount {
    VolumeMount {
        name: SECRET_VOLUME_NAME.to_string(),
        mount_path: reference.mount_path.clone(),
        sub_path: Some(reference.sub_path.clone()),
        read_only: Some(true),
        ..Default::default()
    }
}
