//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::server::TlsFiles;

/// Injects secrets into pods and redeploys workloads when secrets rotate
#[derive(Debug, Parser)]
#[command(name = "secret-injector")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the mutating admission webhook
    Webhook(WebhookArgs),
    /// Watch rotation mappings and redeploy workloads on secret changes
    Rotator(RotatorArgs),
}

#[derive(Debug, Args)]
pub struct WebhookArgs {
    /// Image of the init container that fetches secrets
    #[arg(long, env = "SECRETS_INIT_IMAGE")]
    pub init_image: String,

    /// Address the webhook listens on
    #[arg(long, env = "WEBHOOK_LISTEN", default_value = "0.0.0.0:8443")]
    pub listen: SocketAddr,

    /// PEM certificate; plain HTTP is served when absent
    #[arg(long, env = "WEBHOOK_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching the certificate
    #[arg(long, env = "WEBHOOK_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

impl WebhookArgs {
    pub fn tls(&self) -> Option<TlsFiles> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Args)]
pub struct RotatorArgs {
    /// URL of the queue receiving rotation notifications
    #[arg(long, env = "SECRETS_SQS_QUEUE_URL")]
    pub queue_url: String,

    /// Queue region, the SDK provider chain decides when unset
    #[arg(long, env = "AWS_DEFAULT_REGION")]
    pub region: Option<String>,

    /// Seconds between cycles for mappings without their own interval
    #[arg(
        long,
        env = "SECRETS_ROTATE_AFTER",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=86_400)
    )]
    pub rotate_after: u64,
}

impl RotatorArgs {
    pub fn rotate_after(&self) -> Duration {
        Duration::from_secs(self.rotate_after)
    }
}

/// Installs the global tracing subscriber
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_webhook_defaults() {
        let cli = Cli::try_parse_from(["secret-injector", "webhook", "--init-image", "init:1"]).unwrap();
        let Command::Webhook(args) = cli.command else {
            panic!("expected webhook command");
        };
        assert_eq!(args.init_image, "init:1");
        assert_eq!(args.listen, "0.0.0.0:8443".parse().unwrap());
        assert!(args.tls().is_none());
    }

    #[test]
    fn test_webhook_tls_requires_both_files() {
        let res = Cli::try_parse_from([
            "secret-injector",
            "webhook",
            "--init-image",
            "init:1",
            "--tls-cert",
            "/certs/tls.crt",
        ]);
        assert!(res.is_err());

        let cli = Cli::try_parse_from([
            "secret-injector",
            "webhook",
            "--init-image",
            "init:1",
            "--tls-cert",
            "/certs/tls.crt",
            "--tls-key",
            "/certs/tls.key",
        ])
        .unwrap();
        let Command::Webhook(args) = cli.command else {
            panic!("expected webhook command");
        };
        let tls = args.tls().unwrap();
        assert_eq!(tls.key, PathBuf::from("/certs/tls.key"));
    }

    #[test]
    fn test_rotator_args() {
        let cli = Cli::try_parse_from([
            "secret-injector",
            "--log-json",
            "rotator",
            "--queue-url",
            "https://sqs.eu-west-1.amazonaws.com/123/rotations",
            "--rotate-after",
            "30",
        ])
        .unwrap();
        assert!(cli.log_json);
        let Command::Rotator(args) = cli.command else {
            panic!("expected rotator command");
        };
        assert_eq!(args.rotate_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_rotate_after_is_bounded() {
        for value in ["0", "86401", "18446744073709551615"] {
            let res = Cli::try_parse_from([
                "secret-injector",
                "rotator",
                "--queue-url",
                "https://sqs.eu-west-1.amazonaws.com/123/rotations",
                "--rotate-after",
                value,
            ]);
            assert!(res.is_err(), "{value} was accepted");
        }
    }
}
