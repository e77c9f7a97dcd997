//! Defines the ways in which handling an event can fail.

use thiserror::Error;

/// Errors raised while handling an upload notification. The causes
/// of service failures are reachable through `source`, not the
/// message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The inbound payload is not an S3 notification, or its first
    /// record lacks an object key.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Listing the clusters that are currently starting failed.
    #[error("Failed to query starting clusters")]
    ClusterQueryFailed(#[source] anyhow::Error),

    /// The cluster creation request failed.
    #[error("Failed to create cluster")]
    ClusterCreateFailed(#[source] anyhow::Error),
}
