use anyhow::{Context, Result};
use aws_sdk_sqs::{types::DeleteMessageBatchRequestEntry, Client};
use core::time::Duration;
use emr_trigger::{app, client};
use std::env::var;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// The minimum time to wait between ticks, in milliseconds.
const BASE_LAPSE_TIME: u64 = 300;

/// The base of the exponential backoff sequence.
const BACKOFF_BASE: u64 = 2;

/// The maximum amount of milliseconds to sleep between ticks. Set to
/// the equivalent of 20 minutes.
const MAX_SLEEP: u64 = 1200000;

/// Wrapper structure that executes successive SQS consumption cycles:
/// receive messages carrying S3 notifications, invoke the handler on
/// each of them, and finally delete the messages that were handled.
struct SQSConsumer {
    queue_url: String,
    visibility_timeout: i32,
    max_number_of_messages: i32,
    client: Client,
    backoff: u32,
}

impl SQSConsumer {
    /// Record a success and wait a little while.
    async fn pass(&mut self) {
        self.backoff = 0;
        sleep(Duration::from_millis(BASE_LAPSE_TIME)).await;
    }

    /// Record a failure and wait a while.
    async fn fail(&mut self) {
        sleep(Duration::from_millis(std::cmp::min(
            BASE_LAPSE_TIME.saturating_mul(BACKOFF_BASE.saturating_pow(self.backoff)),
            MAX_SLEEP,
        )))
        .await;
        self.backoff = self.backoff.saturating_add(1);
    }

    /// Perform a single pass of the SQS consumption cycle.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) {
        let result = match self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .visibility_timeout(self.visibility_timeout)
            .max_number_of_messages(self.max_number_of_messages)
            .wait_time_seconds(30)
            .send()
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("Error while consuming messages from SQS queue: {:?}", e);
                return self.fail().await;
            }
        };
        let messages = result.messages().unwrap_or_default();
        if messages.is_empty() {
            return self.pass().await;
        }

        // Messages without a body are handed over as null, which the
        // handler rejects as a malformed event.
        let bodies: Vec<&str> = messages
            .iter()
            .map(|message| message.body().unwrap_or("null"))
            .collect();
        let outcome = app::current()
            .handle_batch(&bodies, client::current())
            .await;

        // Only the handled messages are deleted; the failed ones are
        // received again once their visibility timeout expires.
        let mut delete_failed = false;
        if !outcome.handled.is_empty() {
            info!(
                "Deleting {} out of {} SQS messages",
                outcome.handled.len(),
                messages.len()
            );
            match self
                .client
                .delete_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(
                    outcome
                        .handled
                        .iter()
                        .map(|&index| {
                            let message = &messages[index];
                            DeleteMessageBatchRequestEntry::builder()
                                .set_id(message.message_id().map(String::from))
                                .set_receipt_handle(message.receipt_handle().map(String::from))
                                .build()
                        })
                        .collect(),
                ))
                .send()
                .await
            {
                Ok(result) => {
                    let failed = result.failed().unwrap_or_default().len();
                    if failed > 0 {
                        warn!(
                            "Couldn't delete some SQS messages: {:?} out of {:?} weren't deleted",
                            failed,
                            outcome.handled.len()
                        );
                    }
                }
                Err(e) => {
                    warn!("Couldn't delete SQS messages: {:?}", e);
                    delete_failed = true;
                }
            }
        }
        for (index, e) in &outcome.failed {
            warn!(
                "Error encountered while handling message {:?}; it won't be deleted: {:?}",
                messages[*index].message_id(),
                e
            );
        }
        if delete_failed || !outcome.failed.is_empty() {
            return self.fail().await;
        }
        self.pass().await;
    }
}

/// Consume S3 upload notifications from an SQS queue, starting the
/// cluster whenever one of them warrants it.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init().await?;

    let queue_url = var("SQS_QUEUE_URL").context("SQS_QUEUE_URL is required")?;
    let visibility_timeout = var("SQS_VISIBILITY_TIMEOUT")
        .unwrap_or(String::from("30"))
        .parse::<i32>()
        .context("SQS_VISIBILITY_TIMEOUT must be a number")?;
    let max_number_of_messages = var("SQS_MAX_NUMBER_OF_MESSAGES")
        .unwrap_or(String::from("1"))
        .parse::<i32>()
        .context("SQS_MAX_NUMBER_OF_MESSAGES must be a number")?;
    let sqs_client = Client::new(client::aws_service_config().await);

    let mut consumer = SQSConsumer {
        queue_url,
        visibility_timeout,
        max_number_of_messages,
        client: sqs_client,
        backoff: 0,
    };

    // Listen for abort signals
    let (stop_processing, mut should_stop) = tokio::sync::oneshot::channel();
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("CTRL-C");
            let _ = stop_processing.send(());
        }
    });

    // Continuously receive messages and handle the notifications
    // they carry
    loop {
        tokio::select! {
            _ = consumer.tick() => (),
            _ = &mut should_stop => break
        }
    }
    Ok(())
}
