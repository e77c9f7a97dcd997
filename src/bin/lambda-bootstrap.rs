use anyhow::{anyhow, Context, Result};
use emr_trigger::app::{self, Response};
use emr_trigger::client;
use lambda_runtime::{run, service_fn, LambdaEvent};
use serde_json::Value;

/// Handle the S3 notification, starting the cluster if warranted.
async fn function_handler(event: LambdaEvent<Value>) -> Result<Response> {
    app::current()
        .handle(&event.payload, client::current())
        .await
        .with_context(|| format!("Failed to handle event {}", event.context.request_id))
}

/// Run an AWS Lambda function that listens to S3 upload
/// notifications and starts an EMR cluster running a fixed sequence
/// of jobs whenever a file lands under the trigger prefix.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init().await?;

    run(service_fn(function_handler))
        .await
        .map_err(|e| anyhow!("{:?}", e))
}
