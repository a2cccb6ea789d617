use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info};

use crate::patch::{PodMutationContext, build_patch};
use crate::{
    ANNOTATION_INJECT, ANNOTATION_INJECT_ENABLED, ANNOTATION_SECRET_ARN, INIT_CONTAINER_NAME,
    Error, Result,
};

#[async_trait]
pub trait MutatingAdmissionHandler: Send + Sync {
    /// Error type returned by the handler
    type Err: StdError + Send + Sync + 'static;

    /// Returns the name of this handler for logging purposes
    fn name(&self) -> &'static str;

    /// Mutates the resource in the admission request
    ///
    /// Returns an `AdmissionResponse` that may include JSON patches to modify the resource.
    /// An error denies the request with the error message.
    async fn mutate(
        &self,
        req: &AdmissionRequest<DynamicObject>,
    ) -> Result<AdmissionResponse, Self::Err>;
}

/// Injects the secrets init container, volume and mounts into annotated pods
#[derive(Debug, Clone)]
pub struct SecretInjector {
    init_image: String,
}

impl SecretInjector {
    pub fn new(init_image: impl Into<String>) -> Self {
        Self {
            init_image: init_image.into(),
        }
    }
}

#[async_trait]
impl MutatingAdmissionHandler for SecretInjector {
    type Err = Error;

    fn name(&self) -> &'static str {
        "SecretInjector"
    }

    async fn mutate(&self, req: &AdmissionRequest<DynamicObject>) -> Result<AdmissionResponse> {
        let res = AdmissionResponse::from(req);

        let Some(obj) = &req.object else {
            return Ok(res);
        };

        if !is_pod_resource(req) {
            debug!(resource = %req.resource.resource, "not a pod, skipping");
            return Ok(res);
        }

        let pod = PodMutationContext::from(decode_pod(obj)?);
        if !should_mutate(&pod) {
            debug!(name = %obj.name_any(), uid = %req.uid, "secret injection not requested, skipping");
            return Ok(res);
        }

        let patch = build_patch(&pod, &self.init_image)?;
        debug!(name = %obj.name_any(), operations = patch.0.len(), "built secret injection patch");

        Ok(res.with_patch(patch)?)
    }
}

/// Whether the pod asks for injection and has not been injected yet
///
/// Admission retries and updates see the injected init container and are skipped.
pub fn should_mutate(pod: &PodMutationContext) -> bool {
    let enabled = pod
        .annotations
        .get(ANNOTATION_INJECT)
        .is_some_and(|v| v == ANNOTATION_INJECT_ENABLED);

    enabled
        && pod.annotations.contains_key(ANNOTATION_SECRET_ARN)
        && !pod.has_container(INIT_CONTAINER_NAME)
}

fn is_pod_resource(req: &AdmissionRequest<DynamicObject>) -> bool {
    req.resource.group.is_empty() && req.resource.version == "v1" && req.resource.resource == "pods"
}

fn decode_pod(obj: &DynamicObject) -> Result<Pod> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(Error::Decode)
}

/// Runs every handler against one admission request and folds their responses
///
/// The first failing handler denies the request with its error message.
pub async fn review<E: StdError + Send + Sync + 'static>(
    handlers: &[Box<dyn MutatingAdmissionHandler<Err = E>>],
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let mut res = AdmissionResponse::from(req);

    let Some(obj) = &req.object else {
        return res;
    };

    let name = obj.name_any();
    let kind = obj.types.clone().unwrap_or_default().kind;

    for handler in handlers {
        match handler.mutate(req).await {
            Ok(handler_res) => {
                res = merge_responses(res, handler_res);
                info!(
                    handler = handler.name(),
                    operation = ?req.operation,
                    kind = %kind,
                    name = %name,
                    "mutated resource"
                );
            }
            Err(err) => {
                error!(
                    handler = handler.name(),
                    operation = ?req.operation,
                    kind = %kind,
                    name = %name,
                    error = %err,
                    "mutation failed"
                );
                res = res.deny(format!("{}: {}", handler.name(), err));
                break;
            }
        }
    }

    res
}

/// Creates a warp route handler for mutating admission webhooks
pub(crate) fn create_mutating_route<E: StdError + Send + Sync + 'static>(
    handlers: Vec<Box<dyn MutatingAdmissionHandler<Err = E>>>,
) -> impl Fn(
    AdmissionReview<DynamicObject>,
) -> std::pin::Pin<Box<dyn Future<Output = Result<warp::reply::Json, Infallible>> + Send>>
+ Clone {
    let handlers = Arc::new(handlers);
    move |body: AdmissionReview<DynamicObject>| {
        let handlers = handlers.clone();
        Box::pin(async move {
            let req: AdmissionRequest<_> = match body.try_into() {
                Ok(req) => req,
                Err(err) => {
                    error!("invalid admission request: {}", err);
                    return Ok(warp::reply::json(
                        &AdmissionResponse::invalid(err.to_string()).into_review(),
                    ));
                }
            };

            let res = review(&handlers, &req).await;
            Ok(warp::reply::json(&res.into_review()))
        })
    }
}

fn merge_responses(base: AdmissionResponse, other: AdmissionResponse) -> AdmissionResponse {
    use json_patch::Patch;
    use serde_json::*;

    if !other.allowed {
        return other;
    }

    let Some(base_patch) = base.patch.as_ref() else {
        return other;
    };
    let Some(other_patch) = other.patch.as_ref() else {
        return base;
    };

    let (Ok(base_patches), Ok(other_patches)) = (
        from_slice::<Vec<Value>>(base_patch),
        from_slice::<Vec<Value>>(other_patch),
    ) else {
        return base;
    };

    let combined = [base_patches, other_patches]
        .into_iter()
        .flatten()
        .collect::<Value>();

    let Ok(patch) = from_value::<Patch>(combined) else {
        return base;
    };

    other.with_patch(patch).unwrap_or(base)
}
