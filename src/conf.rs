//! Defines configuration as read from the environment.

use serde::Deserialize;

/// Default `bucket_name` value.
fn default_bucket_name() -> String {
    String::from("zeyonewbuck")
}

/// Default `cluster_name` value.
fn default_cluster_name() -> String {
    String::from("ZeyoCluster1")
}

/// Default `release_label` value.
fn default_release_label() -> String {
    String::from("emr-6.4.0")
}

/// Default `log_uri` value.
fn default_log_uri() -> String {
    String::from("s3://aws-logs-590183979912-ap-south-1/elasticmapreduce/")
}

/// Default `service_role` value.
fn default_service_role() -> String {
    String::from(
        "arn:aws:iam::590183979912:role/service-role/AmazonEMR-ServiceRole-20240328T131538",
    )
}

/// Default `instance_profile_role` value.
fn default_instance_profile_role() -> String {
    String::from("AmazonEMR-InstanceProfile-20240328T131520")
}

/// Default `key_pair_name` value.
fn default_key_pair_name() -> String {
    String::from("39kf")
}

/// Default `trigger_prefix` value.
fn default_trigger_prefix() -> String {
    String::from("trigger/")
}

/// Default `artifact_path` value.
fn default_artifact_path() -> String {
    String::from("s3://zeyoauto/zeyospark.jar")
}

/// The trigger reacts to uploads under a prefix of a bucket by
/// starting an EMR cluster that runs a fixed sequence of Spark
/// jobs. The configuration must be given as environment variables;
/// every one of them is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// The bucket watched for uploads. Only used to describe events
    /// in the logs.
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,

    /// The name given to the cluster. It's also the name checked
    /// against clusters that are currently starting, to avoid
    /// launching the same cluster twice.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// The EMR release label of the cluster.
    #[serde(default = "default_release_label")]
    pub release_label: String,

    /// The S3 location where the cluster writes its logs.
    #[serde(default = "default_log_uri")]
    pub log_uri: String,

    /// The IAM role assumed by the EMR service.
    #[serde(default = "default_service_role")]
    pub service_role: String,

    /// The instance profile given to the cluster's EC2 instances.
    #[serde(default = "default_instance_profile_role")]
    pub instance_profile_role: String,

    /// The EC2 key pair installed on the cluster's instances.
    #[serde(default = "default_key_pair_name")]
    pub key_pair_name: String,

    /// The literal key prefix that uploads must have to start the
    /// cluster. It's not a pattern: no wildcards are interpreted.
    #[serde(default = "default_trigger_prefix")]
    pub trigger_prefix: String,

    /// The location of the jar holding the job classes.
    #[serde(default = "default_artifact_path")]
    pub artifact_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bucket_name: default_bucket_name(),
            cluster_name: default_cluster_name(),
            release_label: default_release_label(),
            log_uri: default_log_uri(),
            service_role: default_service_role(),
            instance_profile_role: default_instance_profile_role(),
            key_pair_name: default_key_pair_name(),
            trigger_prefix: default_trigger_prefix(),
            artifact_path: default_artifact_path(),
        }
    }
}
