use clap::Parser;

use secret_injector::admission::{MutatingAdmissionHandler, SecretInjector};
use secret_injector::config::{Cli, Command, RotatorArgs, WebhookArgs, init_logging};
use secret_injector::operator::Operator;
use secret_injector::{Error, server};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let operator = match cli.command {
        Command::Webhook(args) => webhook(args),
        Command::Rotator(args) => rotator(args).await?,
    };

    let failed = operator.run().await;
    if failed > 0 {
        tracing::error!(failed, "operator stopped with failed tasks");
        std::process::exit(1);
    }

    Ok(())
}

fn webhook(args: WebhookArgs) -> Operator {
    let tls = args.tls();
    let handlers: Vec<Box<dyn MutatingAdmissionHandler<Err = Error>>> =
        vec![Box::new(SecretInjector::new(args.init_image))];

    Operator::new().task("webhook", server::serve(args.listen, tls, handlers))
}

#[cfg(feature = "sqs")]
async fn rotator(args: RotatorArgs) -> Result<Operator, Error> {
    use std::sync::Arc;

    use secret_injector::context::Context;
    use secret_injector::queue::SqsQueue;
    use secret_injector::reconcile;

    let client = kube::Client::try_default().await?;
    let queue = SqsQueue::connect(&args.queue_url, args.region.clone()).await;
    let ctx = Arc::new(Context::new(client, Arc::new(queue), args.rotate_after()));

    Ok(Operator::new().task("rotator", async move {
        reconcile::watch(ctx).await;
        Ok(())
    }))
}

#[cfg(not(feature = "sqs"))]
async fn rotator(_: RotatorArgs) -> Result<Operator, Error> {
    Err(Error::Server("rotator requires the `sqs` feature".into()))
}
