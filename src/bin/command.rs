use anyhow::{Context, Result};
use emr_trigger::{app, client};
use serde_json::json;
use std::env::var;

/// Handle a single upload given through the environment, as if it
/// had been notified by S3, and print the response.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init().await?;

    let key = var("OBJECT_KEY").context("OBJECT_KEY is required")?;
    let event = json!({
        "Records": [{
            "eventSource": "aws:s3",
            "s3": {
                "bucket": {"name": &app::current().settings.bucket_name},
                "object": {"key": &key}
            }
        }]
    });

    let response = app::current()
        .handle(&event, client::current())
        .await
        .with_context(|| format!("Failed to handle upload of {:?}", key))?;
    println!("{}", serde_json::to_string(&response)?);

    Ok(())
}
