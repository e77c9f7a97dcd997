//! Defines the cluster service the handler talks to, and its EMR
//! implementation backed by the global AWS clients.

use crate::cluster::{self, ClusterRequest};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{from_env, SdkConfig};
use aws_sdk_emr::types::{
    ActionOnFailure, Application, ClusterState, ClusterSummary, EbsBlockDeviceConfig,
    EbsConfiguration, HadoopJarStepConfig, InstanceGroupConfig, InstanceRoleType,
    JobFlowInstancesConfig, ScaleDownBehavior, StepConfig, Tag, VolumeSpecification,
};
use aws_sdk_emr::Client;
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::env;

/// A cluster found while checking for duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingCluster {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// The operations the handler needs from the cluster service.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Lists every cluster currently in the STARTING state.
    async fn starting_clusters(&self) -> Result<Vec<ExistingCluster>>;

    /// Requests the creation of a cluster, returning its identifier
    /// if the service reported one.
    async fn create_cluster(&self, request: &ClusterRequest) -> Result<Option<String>>;
}

/// The cluster service as provided by EMR.
#[derive(Clone)]
pub struct EmrClusterService {
    client: Client,
}

impl EmrClusterService {
    /// Wrap an EMR client.
    pub fn new(client: Client) -> Self {
        EmrClusterService { client }
    }
}

impl From<&ClusterSummary> for ExistingCluster {
    fn from(summary: &ClusterSummary) -> Self {
        ExistingCluster {
            name: summary.name().map(String::from).unwrap_or_default(),
            created_at: summary
                .status()
                .and_then(|status| status.timeline())
                .and_then(|timeline| timeline.creation_date_time())
                .and_then(|date_time| date_time.to_chrono_utc().ok()),
        }
    }
}

#[async_trait]
impl ClusterService for EmrClusterService {
    async fn starting_clusters(&self) -> Result<Vec<ExistingCluster>> {
        let mut clusters = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let response = self
                .client
                .list_clusters()
                .cluster_states(ClusterState::Starting)
                .set_marker(marker.clone())
                .send()
                .await
                .with_context(|| {
                    format!(
                        "Failed to list starting clusters using {} marker",
                        if marker.is_some() { "a" } else { "no" }
                    )
                })?;
            clusters.extend(
                response
                    .clusters()
                    .unwrap_or_default()
                    .iter()
                    .map(ExistingCluster::from),
            );
            marker = response.marker().map(String::from);
            if marker.is_none() {
                break;
            }
        }
        Ok(clusters)
    }

    async fn create_cluster(&self, request: &ClusterRequest) -> Result<Option<String>> {
        let response = self
            .client
            .run_job_flow()
            .name(&request.name)
            .release_label(&request.release_label)
            .log_uri(&request.log_uri)
            .service_role(&request.service_role)
            .job_flow_role(&request.instance_profile_role)
            .instances(instances_config(request))
            .set_applications(Some(
                request
                    .applications
                    .iter()
                    .map(|name| Application::builder().name(name).build())
                    .collect(),
            ))
            .visible_to_all_users(request.visible_to_all_users)
            .set_tags(Some(
                request
                    .tags
                    .iter()
                    .map(|(key, value)| Tag::builder().key(key).value(value).build())
                    .collect(),
            ))
            .set_steps(Some(request.steps.iter().map(step_config).collect()))
            .scale_down_behavior(scale_down_behavior(request.scale_down_behavior))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to run job flow {:?} with release {:?}",
                    request.name, request.release_label
                )
            })?;
        Ok(response.job_flow_id().map(String::from))
    }
}

/// Translate the instance topology into its EMR shape.
fn instances_config(request: &ClusterRequest) -> JobFlowInstancesConfig {
    JobFlowInstancesConfig::builder()
        .set_instance_groups(Some(
            request
                .instance_groups
                .iter()
                .map(|group| {
                    InstanceGroupConfig::builder()
                        .name(&group.name)
                        .instance_role(match group.role {
                            cluster::InstanceRole::Master => InstanceRoleType::Master,
                        })
                        .instance_type(&group.instance_type)
                        .instance_count(group.instance_count)
                        .ebs_configuration(
                            EbsConfiguration::builder()
                                .set_ebs_block_device_configs(Some(
                                    group
                                        .volumes
                                        .iter()
                                        .map(|volumes| {
                                            EbsBlockDeviceConfig::builder()
                                                .volume_specification(
                                                    VolumeSpecification::builder()
                                                        .volume_type(&volumes.volume_type)
                                                        .size_in_gb(volumes.size_in_gb)
                                                        .build(),
                                                )
                                                .volumes_per_instance(volumes.volumes_per_instance)
                                                .build()
                                        })
                                        .collect(),
                                ))
                                .build(),
                        )
                        .build()
                })
                .collect(),
        ))
        .keep_job_flow_alive_when_no_steps(request.keep_alive_when_no_steps)
        .ec2_key_name(&request.key_pair_name)
        .build()
}

/// Translate a job step into its EMR shape.
fn step_config(step: &cluster::JobStep) -> StepConfig {
    StepConfig::builder()
        .name(&step.name)
        .action_on_failure(match step.action_on_failure {
            cluster::ActionOnFailure::Continue => ActionOnFailure::Continue,
        })
        .hadoop_jar_step(
            HadoopJarStepConfig::builder()
                .jar(&step.jar)
                .set_args(Some(step.args.clone()))
                .build(),
        )
        .build()
}

/// Translate the scale-down behavior into its EMR shape.
fn scale_down_behavior(behavior: cluster::ScaleDownBehavior) -> ScaleDownBehavior {
    match behavior {
        cluster::ScaleDownBehavior::TerminateAtTaskCompletion => {
            ScaleDownBehavior::TerminateAtTaskCompletion
        }
    }
}

/// Global AWS configuration, shared by every service client.
static CONFIG: OnceCell<SdkConfig> = OnceCell::new();

/// Global EMR client instance.
static CURRENT: OnceCell<EmrClusterService> = OnceCell::new();

/// Load the AWS configuration, honoring `AWS_ENDPOINT_URL` to point
/// clients at an alternative endpoint.
pub async fn aws_service_config() -> &'static SdkConfig {
    if let Some(config) = CONFIG.get() {
        return config;
    }
    let endpoint_url_var = env::var("AWS_ENDPOINT_URL");
    let config = if let Ok(endpoint_url) = endpoint_url_var {
        from_env()
            .endpoint_url(
                if endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://") {
                    endpoint_url
                } else {
                    format!("https://{}", endpoint_url)
                },
            )
            .region("us-east-1") // should be OK since the endpoint was overridden
            .load()
    } else {
        from_env().load()
    }
    .await;
    CONFIG.get_or_init(|| config)
}

/// Initialize the global EMR client.
pub async fn init() -> Result<()> {
    let client = Client::new(aws_service_config().await);
    CURRENT
        .set(EmrClusterService::new(client))
        .map_err(|_| anyhow!("client::CURRENT was already initialized"))
}

/// Get the current EMR client instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static EmrClusterService {
    CURRENT.get().expect("client is not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::Settings;
    use aws_credential_types::Credentials;
    use aws_sdk_emr::config::Region;
    use aws_smithy_client::test_connection::TestConnection;
    use aws_smithy_http::body::SdkBody;
    use serde_json::{json, Value};

    /// A service answering each request with the given JSON bodies,
    /// in order.
    fn replaying(bodies: &[Value]) -> (EmrClusterService, TestConnection<SdkBody>) {
        let connection = TestConnection::new(
            bodies
                .iter()
                .map(|body| {
                    (
                        http::Request::builder()
                            .uri("https://elasticmapreduce.us-east-1.amazonaws.com/")
                            .body(SdkBody::empty())
                            .unwrap(),
                        http::Response::builder()
                            .status(200)
                            .header("content-type", "application/x-amz-json-1.1")
                            .body(SdkBody::from(body.to_string()))
                            .unwrap(),
                    )
                })
                .collect(),
        );
        let config = aws_sdk_emr::Config::builder()
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::for_tests())
            .http_connector(connection.clone())
            .build();
        (
            EmrClusterService::new(Client::from_conf(config)),
            connection,
        )
    }

    /// The operation name and JSON body of every request sent.
    fn sent(connection: &TestConnection<SdkBody>) -> Vec<(String, Value)> {
        connection
            .requests()
            .iter()
            .map(|request| {
                let target = request
                    .actual
                    .headers()
                    .get("x-amz-target")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body = serde_json::from_slice(request.actual.body().bytes().unwrap()).unwrap();
                (target, body)
            })
            .collect()
    }

    #[tokio::test]
    async fn starting_clusters_follows_every_page() {
        let (service, connection) = replaying(&[
            json!({"Clusters": [{"Id": "j-1", "Name": "First"}], "Marker": "page-2"}),
            json!({"Clusters": [{"Id": "j-2", "Name": "ZeyoCluster1"}]}),
        ]);
        let names: Vec<String> = service
            .starting_clusters()
            .await
            .unwrap()
            .into_iter()
            .map(|cluster| cluster.name)
            .collect();
        assert_eq!(names, ["First", "ZeyoCluster1"]);

        let requests = sent(&connection);
        assert_eq!(requests.len(), 2);
        for (target, body) in &requests {
            assert_eq!(target, "ElasticMapReduce.ListClusters");
            assert_eq!(body["ClusterStates"], json!(["STARTING"]));
        }
        assert_eq!(requests[0].1.get("Marker"), None);
        assert_eq!(requests[1].1["Marker"], json!("page-2"));
    }

    #[tokio::test]
    async fn create_cluster_sends_the_full_request() {
        let (service, connection) = replaying(&[json!({"JobFlowId": "j-3"})]);
        let request = ClusterRequest::from_settings(&Settings::default());
        assert_eq!(
            service.create_cluster(&request).await.unwrap().as_deref(),
            Some("j-3")
        );

        let requests = sent(&connection);
        assert_eq!(requests.len(), 1);
        let (target, body) = &requests[0];
        assert_eq!(target, "ElasticMapReduce.RunJobFlow");
        assert_eq!(body["Name"], json!("ZeyoCluster1"));
        assert_eq!(body["ReleaseLabel"], json!("emr-6.4.0"));
        assert_eq!(
            body["LogUri"],
            json!("s3://aws-logs-590183979912-ap-south-1/elasticmapreduce/")
        );
        assert_eq!(
            body["ServiceRole"],
            json!("arn:aws:iam::590183979912:role/service-role/AmazonEMR-ServiceRole-20240328T131538")
        );
        assert_eq!(
            body["JobFlowRole"],
            json!("AmazonEMR-InstanceProfile-20240328T131520")
        );
        assert_eq!(body["VisibleToAllUsers"], json!(true));
        assert_eq!(
            body["Applications"],
            json!([{"Name": "Spark"}, {"Name": "Zeppelin"}])
        );
        assert_eq!(
            body["Tags"],
            json!([{"Key": "for-use-with-amazon-emr-managed-policies", "Value": "true"}])
        );
        assert_eq!(body["ScaleDownBehavior"], json!("TERMINATE_AT_TASK_COMPLETION"));
        assert_eq!(body["Instances"]["KeepJobFlowAliveWhenNoSteps"], json!(false));
        assert_eq!(body["Instances"]["Ec2KeyName"], json!("39kf"));
        assert_eq!(
            body["Instances"]["InstanceGroups"][0],
            json!({
                "Name": "MasterNode",
                "InstanceRole": "MASTER",
                "InstanceType": "m5.xlarge",
                "InstanceCount": 1,
                "EbsConfiguration": {
                    "EbsBlockDeviceConfigs": [{
                        "VolumeSpecification": {"VolumeType": "gp2", "SizeInGB": 32},
                        "VolumesPerInstance": 2
                    }]
                }
            })
        );
        let steps = body["Steps"].as_array().unwrap();
        let names: Vec<&str> = steps.iter().filter_map(|step| step["Name"].as_str()).collect();
        assert_eq!(names, ["Snow Job", "API Job", "S3 Job", "Master Job"]);
        assert!(steps
            .iter()
            .all(|step| step["ActionOnFailure"] == json!("CONTINUE")
                && step["HadoopJarStep"]["Jar"] == json!("command-runner.jar")));
        assert_eq!(
            steps[1]["HadoopJarStep"]["Args"],
            json!([
                "spark-submit",
                "--deploy-mode",
                "client",
                "--class",
                "pack.api",
                "s3://zeyoauto/zeyospark.jar"
            ])
        );
    }

    #[test]
    fn steps_keep_order_and_arguments() {
        let request = ClusterRequest::from_settings(&Settings::default());
        let steps: Vec<StepConfig> = request.steps.iter().map(step_config).collect();
        assert_eq!(steps.len(), 4);
        for (config, step) in steps.iter().zip(&request.steps) {
            assert_eq!(config.name(), Some(step.name.as_str()));
            assert_eq!(config.action_on_failure(), Some(&ActionOnFailure::Continue));
            let jar_step = config.hadoop_jar_step().unwrap();
            assert_eq!(jar_step.jar(), Some("command-runner.jar"));
            assert_eq!(jar_step.args(), Some(step.args.as_slice()));
        }
    }

    #[test]
    fn instances_terminate_after_last_step() {
        let request = ClusterRequest::from_settings(&Settings::default());
        let instances = instances_config(&request);
        assert_eq!(Some(instances.keep_job_flow_alive_when_no_steps()), Some(false));
        assert_eq!(instances.ec2_key_name(), Some("39kf"));
        let groups = instances.instance_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].instance_role(), Some(&InstanceRoleType::Master));
    }

    #[test]
    fn summaries_without_status_have_no_creation_time() {
        let summary = ClusterSummary::builder().name("ZeyoCluster1").build();
        assert_eq!(
            ExistingCluster::from(&summary),
            ExistingCluster {
                name: String::from("ZeyoCluster1"),
                created_at: None,
            }
        );
    }
}
