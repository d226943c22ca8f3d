//! Ephemeral containerized build dispatch.
//!
//! Launches exactly one run of the configured task definition with the
//! matched-asset payload injected as container environment. Launch
//! rejections (capacity, IAM, network configuration) are surfaced as
//! structured failures, never retried here.

use async_trait::async_trait;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, ContainerOverride, KeyValuePair, LaunchType,
    NetworkConfiguration, TaskOverride,
};

/// Container environment variable carrying the MatchSet JSON.
pub const ENV_MATCHES: &str = "MATCHED_ASSETS";

/// Container environment variable carrying the MatchSet size.
pub const ENV_MATCH_COUNT: &str = "MATCHED_ASSET_COUNT";

/// Errors from task launch.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The backend accepted the request but rejected the launch.
    #[error("Task launch rejected: {reason}")]
    Rejected { reason: String },

    /// The launch request itself failed.
    #[error("Task launch request failed: {0}")]
    Request(String),
}

/// Launches one build run on the ephemeral backend.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Launch exactly one run with the matched-asset payload injected;
    /// returns the launched job's identifier.
    async fn launch(&self, matches_json: &str, match_count: usize) -> Result<String, LaunchError>;
}

/// ECS/Fargate [`TaskLauncher`].
pub struct EcsTaskLauncher {
    client: aws_sdk_ecs::Client,
    cluster: String,
    task_definition: String,
    container: String,
    subnets: Vec<String>,
    security_group: String,
}

impl EcsTaskLauncher {
    pub fn new(
        client: aws_sdk_ecs::Client,
        cluster: impl Into<String>,
        task_definition: impl Into<String>,
        container: impl Into<String>,
        subnets: Vec<String>,
        security_group: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            task_definition: task_definition.into(),
            container: container.into(),
            subnets,
            security_group: security_group.into(),
        }
    }
}

#[async_trait]
impl TaskLauncher for EcsTaskLauncher {
    async fn launch(&self, matches_json: &str, match_count: usize) -> Result<String, LaunchError> {
        let network = AwsVpcConfiguration::builder()
            .set_subnets(Some(self.subnets.clone()))
            .security_groups(&self.security_group)
            .assign_public_ip(AssignPublicIp::Enabled)
            .build()
            .map_err(|e| LaunchError::Request(e.to_string()))?;

        let overrides = TaskOverride::builder()
            .container_overrides(
                ContainerOverride::builder()
                    .name(&self.container)
                    .environment(
                        KeyValuePair::builder()
                            .name(ENV_MATCHES)
                            .value(matches_json)
                            .build(),
                    )
                    .environment(
                        KeyValuePair::builder()
                            .name(ENV_MATCH_COUNT)
                            .value(match_count.to_string())
                            .build(),
                    )
                    .build(),
            )
            .build();

        let output = self
            .client
            .run_task()
            .cluster(&self.cluster)
            .task_definition(&self.task_definition)
            .count(1)
            .launch_type(LaunchType::Fargate)
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(network)
                    .build(),
            )
            .overrides(overrides)
            .started_by("tourbuild-worker")
            .send()
            .await
            .map_err(|e| LaunchError::Request(e.to_string()))?;

        if let Some(failure) = output.failures().first() {
            return Err(LaunchError::Rejected {
                reason: format!(
                    "{}: {}",
                    failure.reason().unwrap_or("unknown"),
                    failure.detail().unwrap_or(""),
                ),
            });
        }

        let task_arn = output
            .tasks()
            .first()
            .and_then(|task| task.task_arn())
            .ok_or_else(|| LaunchError::Rejected {
                reason: "backend returned neither task nor failure".to_string(),
            })?;

        tracing::info!(
            cluster = %self.cluster,
            task_definition = %self.task_definition,
            task_arn,
            match_count,
            "Build task launched",
        );
        Ok(task_arn.to_string())
    }
}
