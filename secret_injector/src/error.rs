use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the admission gate and the rotation reconciler
#[derive(Error, Debug)]
pub enum Error {
    /// The pod or event payload could not be decoded
    #[error("DecodeError: {0}")]
    Decode(#[source] serde_json::Error),

    /// A secret reference does not name a valid secret identifier
    #[error("invalid secret identifier: {0}")]
    InvalidIdentifier(String),

    /// A secret reference carries a mount path that is not absolute
    #[error("mount path must be absolute: {0}")]
    InvalidMountPath(String),

    /// The notification queue or the cluster could not be read
    #[error("failed to fetch {kind}: {source}")]
    ResourceFetch {
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    /// A workload could not be patched with a fresh redeploy marker
    #[error("failed to patch {kind} {namespace}/{name}: {source}")]
    WorkloadPatch {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: BoxError,
    },

    /// Error during JSON serialization
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    /// The JSON patch could not be attached to the admission response
    #[error("Patch Error: {0}")]
    Patch(#[from] kube::core::admission::SerializePatchError),

    /// Error from the Kubernetes client
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    /// A service could not be started, e.g. the webhook listener failed to bind
    #[error("Server Error: {0}")]
    Server(#[source] BoxError),
}

impl Error {
    pub(crate) fn fetch(kind: &'static str, source: impl Into<BoxError>) -> Self {
        Self::ResourceFetch {
            kind,
            source: source.into(),
        }
    }
}

/// Result type for secret injector operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
