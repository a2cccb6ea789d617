//! HTTP(S) transport for the mutating webhook
//!
//! `POST /mutate` accepts an `AdmissionReview` and answers with the folded
//! response of every registered handler. `GET /healthz` answers `ok`.

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::path::PathBuf;

use warp::{Filter, Rejection, Reply};

use crate::admission::{MutatingAdmissionHandler, create_mutating_route};
use crate::{Error, Result};

/// Certificate and key used to terminate TLS
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Builds the webhook routes for a set of mutating handlers
pub fn routes<E: StdError + Send + Sync + 'static>(
    handlers: Vec<Box<dyn MutatingAdmissionHandler<Err = E>>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let mutate = warp::post()
        .and(warp::path("mutate"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and_then(create_mutating_route(handlers));

    let health = warp::get()
        .and(warp::path("healthz"))
        .and(warp::path::end())
        .map(|| "ok");

    mutate.or(health)
}

/// Serves the webhook until the process exits
///
/// Fails when the listener cannot be bound or the TLS files cannot be read.
pub async fn serve<E: StdError + Send + Sync + 'static>(
    addr: SocketAddr,
    tls: Option<TlsFiles>,
    handlers: Vec<Box<dyn MutatingAdmissionHandler<Err = E>>>,
) -> Result<()> {
    let routes = routes(handlers).with(warp::trace::request());

    match tls {
        Some(tls) => {
            let cert = tokio::fs::read(&tls.cert).await.map_err(server_error)?;
            let key = tokio::fs::read(&tls.key).await.map_err(server_error)?;

            // the tls server only offers a panicking bind
            drop(std::net::TcpListener::bind(addr).map_err(server_error)?);

            tracing::info!(%addr, cert = %tls.cert.display(), "starting webhook server with tls");
            warp::serve(routes).tls().cert(cert).key(key).run(addr).await;
        }
        None => {
            let (addr, server) = warp::serve(routes)
                .try_bind_ephemeral(addr)
                .map_err(server_error)?;

            tracing::warn!(%addr, "starting webhook server without tls");
            server.await;
        }
    }

    Ok(())
}

fn server_error(err: impl StdError + Send + Sync + 'static) -> Error {
    Error::Server(Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::SecretInjector;
    use serde_json::{Value, json};

    fn handlers() -> Vec<Box<dyn MutatingAdmissionHandler<Err = Error>>> {
        vec![Box::new(SecretInjector::new("secrets-init:latest"))]
    }

    fn review(annotations: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "c0ffee",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {},
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": { "name": "app", "annotations": annotations },
                    "spec": { "containers": [{ "name": "app" }] }
                }
            }
        })
    }

    async fn post(body: &Value) -> Value {
        let res = warp::test::request()
            .method("POST")
            .path("/mutate")
            .json(body)
            .reply(&routes(handlers()))
            .await;

        assert_eq!(res.status(), 200);
        serde_json::from_slice(res.body()).unwrap()
    }

    #[tokio::test]
    async fn test_mutate_route_returns_json_patch() {
        let body = review(json!({
            "secrets.k8s.aws/sidecarInjectorWebhook": "enabled",
            "secrets.k8s.aws/secret-arn": "arn:aws:secretsmanager:us-east-1:123456789012:secret:db"
        }));
        let out = post(&body).await;

        let response = &out["response"];
        assert_eq!(response["uid"], "c0ffee");
        assert_eq!(response["allowed"], true);
        assert_eq!(response["patchType"], "JSONPatch");
        assert!(!response["patch"].is_null());
    }

    #[tokio::test]
    async fn test_mutate_route_denies_invalid_reference() {
        let body = review(json!({
            "secrets.k8s.aws/sidecarInjectorWebhook": "enabled",
            "secrets.k8s.aws/secret-arn": "batata"
        }));
        let out = post(&body).await;

        let response = &out["response"];
        assert_eq!(response["allowed"], false);
        assert!(response["status"]["message"].as_str().unwrap().contains("batata"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let res = warp::test::request()
            .path("/healthz")
            .reply(&routes(handlers()))
            .await;

        assert_eq!(res.status(), 200);
        assert_eq!(res.body().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn test_serve_reports_address_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let err = serve(addr, None, handlers()).await.unwrap_err();
        assert!(matches!(err, Error::Server(_)));
    }

    #[tokio::test]
    async fn test_serve_reports_missing_tls_files() {
        let tls = TlsFiles {
            cert: "/nonexistent/tls.crt".into(),
            key: "/nonexistent/tls.key".into(),
        };

        let err = serve("127.0.0.1:0".parse().unwrap(), Some(tls), handlers())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server(_)));
    }
}
