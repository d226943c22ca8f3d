//! One invocation end to end, wired to the real backends.
//!
//! The invocation boundary has no caller to receive an error, so
//! [`run_invocation`] converts every fault into a structured
//! [`DispatchReport`] instead of propagating it.

use tourbuild_catalog::connection::{CatalogError, CatalogPool};
use tourbuild_catalog::repo::TourRepo;
use tourbuild_catalog::secrets::{self, SecretError};
use tourbuild_cloud::command::{SsmCommandChannel, SubmitMode};
use tourbuild_cloud::guard::{self, EcsPendingTaskSource};
use tourbuild_cloud::instance::Ec2InstanceControl;
use tourbuild_cloud::poll::TokioSleeper;
use tourbuild_cloud::storage::{StorageError, StorageLister};
use tourbuild_cloud::task::EcsTaskLauncher;
use tourbuild_core::report::DispatchReport;

use crate::config::{BackendConfig, WorkerConfig};
use crate::dispatch::{reconcile_and_dispatch, Backend, InstanceDispatch};
use crate::trigger::TriggerPayload;

/// How long a secret retrieval may take before the invocation gives up.
const SECRET_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Faults that can end an invocation before dispatch is attempted.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Run one reconcile-and-dispatch invocation. Never fails: faults
/// surface as an undispatched report.
pub async fn run_invocation(config: &WorkerConfig, trigger: &TriggerPayload) -> DispatchReport {
    let invocation_id = uuid::Uuid::new_v4();
    tracing::info!(
        invocation_id = %invocation_id,
        full_rescan = trigger.is_full_rescan(),
        records = trigger.records.len(),
        "Invocation triggered",
    );

    match try_run(config, trigger).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(invocation_id = %invocation_id, error = %e, "Invocation failed");
            DispatchReport::skipped(config.backend.kind(), 0, format!("invocation failed: {e}"))
        }
    }
}

async fn try_run(
    config: &WorkerConfig,
    trigger: &TriggerPayload,
) -> Result<DispatchReport, WorkerError> {
    for record in &trigger.records {
        tracing::info!(
            event = %record.event_name,
            bucket = %record.s3.bucket.name,
            key = %record.s3.object.decoded_key(),
            size = record.s3.object.size,
            "Upload record",
        );
    }

    let sdk_config = aws_config::load_from_env().await;

    let secrets_client = secrets::build_client(&sdk_config, SECRET_TIMEOUT);
    let uri = secrets::fetch_connection_string(&secrets_client, &config.catalog_secret_id).await?;

    let pool = CatalogPool::new(uri);
    let db = pool.database().await?;
    let assets = TourRepo::list_asset_refs(&db).await?;

    let lister = StorageLister::new(&sdk_config, &config.bucket, &config.prefix);
    let storage_keys = lister.list_keys().await?;

    let sleeper = TokioSleeper;

    match &config.backend {
        BackendConfig::Task {
            cluster,
            task_definition,
            container,
            subnets,
            security_group,
        } => {
            let ecs = aws_sdk_ecs::Client::new(&sdk_config);
            let source = EcsPendingTaskSource::new(ecs.clone());
            let launcher = EcsTaskLauncher::new(
                ecs,
                cluster.clone(),
                task_definition.clone(),
                container.clone(),
                subnets.clone(),
                security_group.clone(),
            );
            let family = guard::family_from_task_definition(task_definition);

            Ok(reconcile_and_dispatch(
                &assets,
                &storage_keys,
                Backend::Ephemeral {
                    source: &source,
                    launcher: &launcher,
                    cluster,
                    family,
                },
            )
            .await)
        }
        BackendConfig::Instance {
            instance_id,
            build_script,
            fire_and_forget,
        } => {
            let control = Ec2InstanceControl::new(&sdk_config, instance_id.clone());
            let channel = SsmCommandChannel::new(&sdk_config, instance_id.clone());
            let mode = if *fire_and_forget {
                SubmitMode::FireAndForget
            } else {
                SubmitMode::WaitForCompletion
            };

            Ok(reconcile_and_dispatch(
                &assets,
                &storage_keys,
                Backend::Instance(InstanceDispatch {
                    control: &control,
                    channel: &channel,
                    sleeper: &sleeper,
                    boot_grace: config.boot_grace,
                    build_script: build_script.clone(),
                    mode,
                }),
            )
            .await)
        }
    }
}
