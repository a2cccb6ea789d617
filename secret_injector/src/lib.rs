//! Secret injection for Kubernetes pods
//!
//! Two cooperating parts share this crate:
//!
//! - a mutating admission webhook that adds an init container, an in-memory
//!   volume and read-only mounts to pods annotated with secret references, and
//! - a rotation controller that polls a notification queue and redeploys the
//!   workloads mapped to a secret whenever its value changes.

pub mod admission;
pub mod config;
pub mod context;
pub mod crd;
pub mod error;
pub mod event;
pub mod operator;
pub mod patch;
pub mod queue;
pub mod reconcile;
pub mod reference;
pub mod server;
pub mod workload;

pub use error::{Error, Result};

/// Comma separated list of `<secret-id>[:<mount-path>]` references
pub const ANNOTATION_SECRET_ARN: &str = "secrets.k8s.aws/secret-arn";

/// Opt-in annotation; injection happens only when set to [`ANNOTATION_INJECT_ENABLED`]
pub const ANNOTATION_INJECT: &str = "secrets.k8s.aws/sidecarInjectorWebhook";

pub const ANNOTATION_INJECT_ENABLED: &str = "enabled";

/// Name of the injected init container, also used to detect prior injection
pub const INIT_CONTAINER_NAME: &str = "secrets-init-container";

pub const SECRET_VOLUME_NAME: &str = "secret-vol";

/// Where the init container sees the shared volume
pub const INIT_CONTAINER_MOUNT_PATH: &str = "/tmp";

pub const SECRET_ARN_ENV: &str = "SECRET_ARN";

/// Pod template label rewritten to force a rollout
pub const REDEPLOY_LABEL: &str = "secrets.k8s.aws/redeployed-at";
