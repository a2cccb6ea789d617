use std::collections::BTreeMap;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Longest interval a mapping may wait between polls
pub const MAX_REQUEUE_INTERVAL: Duration = Duration::from_secs(86_400);

/// Binds a secret to the workloads that must be redeployed when its value changes
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "awssecretsoperator.secretoperator",
    version = "v1",
    kind = "SecretsRotationMapping",
    plural = "secretsrotationmappings",
    namespaced,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".spec.secretId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretsRotationMappingSpec {
    /// Secret identifier as it appears in rotation notifications
    pub secret_id: String,

    /// Equality label selector for Deployments, DaemonSets and StatefulSets
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Seconds between polls of the notification queue, at most one day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 86400))]
    pub requeue_interval: Option<u64>,
}

impl SecretsRotationMappingSpec {
    /// Poll interval for this mapping, falling back to `default` when unset or zero
    ///
    /// Capped at [`MAX_REQUEUE_INTERVAL`].
    pub fn requeue_interval(&self, default: Duration) -> Duration {
        self.requeue_interval
            .filter(|secs| *secs > 0)
            .map_or(default, Duration::from_secs)
            .min(MAX_REQUEUE_INTERVAL)
    }

    /// Renders the label map as a `k=v,k=v` selector string
    pub fn label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;
    use serde_json::json;

    #[test]
    fn test_spec_deserializes_camel_case() {
        let spec: SecretsRotationMappingSpec = serde_json::from_value(json!({
            "secretId": "arn:aws:secretsmanager:us-east-1:123456789012:secret:db",
            "labels": { "app": "foo", "tier": "web" },
            "requeueInterval": 30
        }))
        .unwrap();

        assert_eq!(spec.label_selector(), "app=foo,tier=web");
        assert_eq!(spec.requeue_interval(Duration::from_secs(5)), Duration::from_secs(30));
    }

    #[test]
    fn test_requeue_interval_falls_back_to_default() {
        let mut spec = SecretsRotationMappingSpec {
            secret_id: "S".into(),
            labels: BTreeMap::new(),
            requeue_interval: None,
        };
        assert_eq!(spec.requeue_interval(Duration::from_secs(5)), Duration::from_secs(5));

        spec.requeue_interval = Some(0);
        assert_eq!(spec.requeue_interval(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_requeue_interval_is_capped() {
        let spec = SecretsRotationMappingSpec {
            secret_id: "S".into(),
            labels: BTreeMap::new(),
            requeue_interval: Some(u64::MAX),
        };
        assert_eq!(spec.requeue_interval(Duration::from_secs(5)), MAX_REQUEUE_INTERVAL);

        let spec = SecretsRotationMappingSpec {
            requeue_interval: None,
            ..spec
        };
        assert_eq!(spec.requeue_interval(Duration::MAX), MAX_REQUEUE_INTERVAL);
    }

    #[test]
    fn test_crd_schema_bounds_requeue_interval() {
        let crd = serde_json::to_value(SecretsRotationMapping::crd()).unwrap();
        let interval = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]
            ["spec"]["properties"]["requeueInterval"];
        assert!(interval.to_string().contains(r#""maximum":86400"#), "{interval}");
    }

    #[test]
    fn test_crd_names() {
        let crd = SecretsRotationMapping::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("secretsrotationmappings.awssecretsoperator.secretoperator")
        );
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
