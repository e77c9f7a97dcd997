//! Defines the cluster creation request. Everything but the
//! externalized settings is fixed: the topology, the installed
//! applications and the job steps.

use crate::conf::Settings;

/// The jar that runs arbitrary commands as EMR steps.
pub const COMMAND_RUNNER_JAR: &str = "command-runner.jar";

/// The Snowflake connector required by some of the jobs.
pub const SNOWFLAKE_PACKAGE: &str = "net.snowflake:spark-snowflake_2.12:2.11.2-spark_3.1";

/// What the cluster does when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOnFailure {
    /// Move on to the next step.
    Continue,
}

/// The role of an instance group within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Master,
}

/// An EBS volume specification, attached `volumes_per_instance`
/// times to each instance of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbsVolumes {
    pub volume_type: String,
    pub size_in_gb: i32,
    pub volumes_per_instance: i32,
}

/// A set of instances of uniform type and role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceGroup {
    pub name: String,
    pub role: InstanceRole,
    pub instance_type: String,
    pub instance_count: i32,
    pub volumes: Vec<EbsVolumes>,
}

/// A single job run by the cluster, as a command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStep {
    pub name: String,
    pub jar: String,
    pub action_on_failure: ActionOnFailure,
    pub args: Vec<String>,
}

impl JobStep {
    /// A `spark-submit` step running `class` from the jar at
    /// `artifact`, optionally pulling extra packages.
    pub fn spark_submit(name: &str, package: Option<&str>, class: &str, artifact: &str) -> Self {
        let mut args = vec![
            String::from("spark-submit"),
            String::from("--deploy-mode"),
            String::from("client"),
        ];
        if let Some(package) = package {
            args.push(String::from("--packages"));
            args.push(String::from(package));
        }
        args.push(String::from("--class"));
        args.push(String::from(class));
        args.push(String::from(artifact));
        JobStep {
            name: String::from(name),
            jar: String::from(COMMAND_RUNNER_JAR),
            action_on_failure: ActionOnFailure::Continue,
            args,
        }
    }
}

/// How the cluster releases instances when scaling down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDownBehavior {
    /// Only terminate an instance once its current task completes.
    TerminateAtTaskCompletion,
}

/// The full cluster creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRequest {
    pub name: String,
    pub release_label: String,
    pub log_uri: String,
    pub service_role: String,
    pub instance_profile_role: String,
    pub key_pair_name: String,
    pub instance_groups: Vec<InstanceGroup>,
    /// When false, the cluster terminates after its last step.
    pub keep_alive_when_no_steps: bool,
    pub applications: Vec<String>,
    pub visible_to_all_users: bool,
    pub tags: Vec<(String, String)>,
    /// Executed in order.
    pub steps: Vec<JobStep>,
    pub scale_down_behavior: ScaleDownBehavior,
}

impl ClusterRequest {
    /// Build the request out of the configured names, roles and
    /// locations.
    pub fn from_settings(settings: &Settings) -> Self {
        let artifact = settings.artifact_path.as_str();
        ClusterRequest {
            name: settings.cluster_name.clone(),
            release_label: settings.release_label.clone(),
            log_uri: settings.log_uri.clone(),
            service_role: settings.service_role.clone(),
            instance_profile_role: settings.instance_profile_role.clone(),
            key_pair_name: settings.key_pair_name.clone(),
            instance_groups: vec![InstanceGroup {
                name: String::from("MasterNode"),
                role: InstanceRole::Master,
                instance_type: String::from("m5.xlarge"),
                instance_count: 1,
                volumes: vec![EbsVolumes {
                    volume_type: String::from("gp2"),
                    size_in_gb: 32,
                    volumes_per_instance: 2,
                }],
            }],
            keep_alive_when_no_steps: false,
            applications: vec![String::from("Spark"), String::from("Zeppelin")],
            visible_to_all_users: true,
            tags: vec![(
                String::from("for-use-with-amazon-emr-managed-policies"),
                String::from("true"),
            )],
            steps: vec![
                JobStep::spark_submit("Snow Job", Some(SNOWFLAKE_PACKAGE), "pack.snow", artifact),
                JobStep::spark_submit("API Job", None, "pack.api", artifact),
                JobStep::spark_submit("S3 Job", None, "pack.s3", artifact),
                JobStep::spark_submit(
                    "Master Job",
                    Some(SNOWFLAKE_PACKAGE),
                    "pack.master",
                    artifact,
                ),
            ],
            scale_down_behavior: ScaleDownBehavior::TerminateAtTaskCompletion,
        }
    }
}
