//! Defines the read-only application state and the handler that
//! decides whether an upload starts a cluster.

use crate::client::ClusterService;
use crate::cluster::ClusterRequest;
use crate::conf::Settings;
use crate::error::HandlerError;
use crate::trigger::Trigger;
use anyhow::{anyhow, Result};
use envy::from_env;
use itertools::Itertools;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

/// The result of handling a notification, in the shape expected by
/// whatever invoked the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub body: String,
}

/// The four ways a notification can be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event wasn't an S3 notification.
    NotAnS3Event,
    /// The uploaded object is outside the trigger prefix.
    NotInTriggerFolder,
    /// A cluster with the configured name is already starting.
    ClusterAlreadyExists,
    /// The cluster creation request was accepted.
    ClusterStarted { job_flow_id: Option<String> },
}

impl Outcome {
    /// The status code and body reported for this outcome.
    pub fn response(&self) -> Response {
        let (status_code, body) = match self {
            Outcome::NotAnS3Event => (400, "Event is not an S3 event"),
            Outcome::NotInTriggerFolder => (200, "File uploaded but not in the trigger folder"),
            Outcome::ClusterAlreadyExists => (200, "Cluster with the same name already exists"),
            Outcome::ClusterStarted { .. } => (200, "EMR cluster started successfully"),
        };
        Response {
            status_code,
            body: String::from(body),
        }
    }
}

/// The result of handling a batch of queued notifications.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Positions of the notifications handled without error,
    /// including the ones rejected as malformed.
    pub handled: Vec<usize>,

    /// Positions of the notifications whose handling failed, with
    /// the error raised.
    pub failed: Vec<(usize, HandlerError)>,
}

/// An App is an initialized application state, derived from
/// settings. The cluster request never changes between invocations,
/// so it's built once.
pub struct App {
    /// The original settings.
    pub settings: Settings,

    /// The request issued whenever a cluster must be started.
    pub cluster_request: ClusterRequest,
}

impl App {
    /// Initialize an App instance given a settings struct. Consumes
    /// the settings struct.
    pub fn new(settings: Settings) -> Self {
        let cluster_request = ClusterRequest::from_settings(&settings);
        App {
            settings,
            cluster_request,
        }
    }

    /// Handle an upload notification, starting the cluster if the
    /// upload is in the trigger folder and the cluster isn't already
    /// starting. Service failures are returned as errors; everything
    /// else resolves to a response.
    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        event: &Value,
        service: &dyn ClusterService,
    ) -> Result<Response, HandlerError> {
        let outcome = match self.resolve(event, service).await {
            Ok(outcome) => outcome,
            Err(HandlerError::MalformedEvent(reason)) => {
                warn!("Rejecting event: {}", reason);
                Outcome::NotAnS3Event
            }
            Err(e) => {
                error!(error = ?e, "{}", e);
                return Err(e);
            }
        };
        Ok(outcome.response())
    }

    /// Walk the decision procedure and report which branch was taken.
    pub async fn resolve(
        &self,
        event: &Value,
        service: &dyn ClusterService,
    ) -> Result<Outcome, HandlerError> {
        let trigger = Trigger::from_event(event)?;
        let bucket = trigger
            .bucket
            .as_deref()
            .unwrap_or(&self.settings.bucket_name);

        if !trigger.in_folder(&self.settings.trigger_prefix) {
            info!(
                "File {:?} uploaded to bucket {:?} but not under {:?}",
                trigger.key, bucket, self.settings.trigger_prefix
            );
            return Ok(Outcome::NotInTriggerFolder);
        }
        info!(
            "File {:?} uploaded to bucket {:?} under {:?}",
            trigger.key, bucket, self.settings.trigger_prefix
        );

        // Only STARTING clusters are considered: a RUNNING or
        // BOOTSTRAPPING cluster with the same name doesn't block
        // creation, and nothing prevents a concurrent invocation from
        // creating between this check and the request below.
        let starting = service
            .starting_clusters()
            .await
            .map_err(HandlerError::ClusterQueryFailed)?;
        if let Some(existing) = starting
            .iter()
            .find(|cluster| cluster.name == self.cluster_request.name)
        {
            info!(
                "A cluster named {:?} is already starting (created at {}); \
                 skipping cluster creation",
                existing.name,
                existing
                    .created_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| String::from("an unknown time"))
            );
            return Ok(Outcome::ClusterAlreadyExists);
        }
        if !starting.is_empty() {
            info!(
                "Clusters currently starting: {}",
                starting.iter().map(|cluster| &cluster.name).join(", ")
            );
        }

        let job_flow_id = service
            .create_cluster(&self.cluster_request)
            .await
            .map_err(HandlerError::ClusterCreateFailed)?;
        info!(
            "EMR cluster {:?} started successfully with id {:?}",
            self.cluster_request.name, job_flow_id
        );
        Ok(Outcome::ClusterStarted { job_flow_id })
    }

    /// Handle each JSON body of a batch of queued notifications in
    /// order. A failure doesn't stop the rest of the batch, so that
    /// callers can settle the handled notifications and keep only
    /// the failed ones around.
    pub async fn handle_batch(
        &self,
        bodies: &[&str],
        service: &dyn ClusterService,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, body) in bodies.iter().enumerate() {
            // Unparseable bodies are handed over as null, which the
            // handler rejects as a malformed event.
            let event = serde_json::from_str::<Value>(body).unwrap_or_else(|e| {
                warn!("Couldn't parse notification body: {:?}", e);
                Value::Null
            });
            match self.handle(&event, service).await {
                Ok(response) => {
                    info!(
                        "Handled notification with status {}: {}",
                        response.status_code, response.body
                    );
                    outcome.handled.push(index);
                }
                Err(e) => outcome.failed.push((index, e)),
            }
        }
        outcome
    }
}

/// Global App instance.
static CURRENT: OnceCell<App> = OnceCell::new();

/// Initialize the global App instance.
pub fn init() -> Result<()> {
    let settings = from_env()?;
    let app = App::new(settings);
    CURRENT
        .set(app)
        .map_err(|_| anyhow!("app::CURRENT was already initialized"))
}

/// Get the current App instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static App {
    CURRENT.get().expect("app is not initialized")
}
