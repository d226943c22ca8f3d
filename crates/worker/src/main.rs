//! `tourbuild-worker` -- reconcile-and-dispatch entrypoint.
//!
//! Reconciles the tour catalog against the upload bucket and, when
//! matched assets exist and no build is already in flight, dispatches a
//! build to the configured backend. The dispatch report is logged and
//! written to stdout as JSON.
//!
//! Invoked by the external scheduler, optionally with the path to an
//! upload-notification payload as the first argument; with no argument
//! the run is a full rescan.
//!
//! # Environment variables
//!
//! | Variable                       | Required       | Default                  | Description                             |
//! |--------------------------------|----------------|--------------------------|-----------------------------------------|
//! | `TOURBUILD_CATALOG_SECRET_ARN` | yes            | --                       | Secret holding the catalog URI          |
//! | `TOURBUILD_BUCKET`             | yes            | --                       | Upload bucket                           |
//! | `TOURBUILD_PREFIX`             | no             | `image/`                 | Storage prefix to list                  |
//! | `TOURBUILD_BACKEND`            | yes            | --                       | `instance` or `task`                    |
//! | `TOURBUILD_INSTANCE_ID`        | backend=instance | --                     | Build VM instance id                    |
//! | `TOURBUILD_BUILD_SCRIPT`       | no             | `/opt/tourbuild/build.sh`| Build script path on the instance       |
//! | `TOURBUILD_FIRE_AND_FORGET`    | no             | `false`                  | Detach the build instead of waiting     |
//! | `TOURBUILD_BOOT_GRACE_SECS`    | no             | `60`                     | Post-boot grace before remote commands  |
//! | `TOURBUILD_CLUSTER`            | backend=task   | --                       | Cluster for build tasks                 |
//! | `TOURBUILD_TASK_DEFINITION`    | backend=task   | --                       | Task definition (family[:revision])     |
//! | `TOURBUILD_CONTAINER`          | no             | task family              | Container name for overrides            |
//! | `TOURBUILD_SUBNETS`            | backend=task   | --                       | Comma-separated subnet ids              |
//! | `TOURBUILD_SECURITY_GROUP`     | backend=task   | --                       | Security group for the task             |

use tourbuild_worker::config::WorkerConfig;
use tourbuild_worker::invocation::run_invocation;
use tourbuild_worker::trigger::TriggerPayload;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tourbuild_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let trigger = match load_trigger() {
        Ok(trigger) => trigger,
        Err(e) => {
            tracing::error!(error = %e, "Invalid trigger payload");
            std::process::exit(1);
        }
    };

    let report = run_invocation(&config, &trigger).await;

    match serde_json::to_string(&report) {
        Ok(json) => {
            tracing::info!(report = %json, "Invocation complete");
            println!("{json}");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize dispatch report");
            std::process::exit(1);
        }
    }
}

/// Read the trigger payload from the optional first argument (a path to
/// an upload-notification JSON file). No argument means a full rescan.
fn load_trigger() -> Result<TriggerPayload, String> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(TriggerPayload::default());
    };

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("could not read trigger payload {path}: {e}"))?;
    TriggerPayload::parse(&raw).map_err(|e| format!("could not parse trigger payload {path}: {e}"))
}
