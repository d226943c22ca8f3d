//! Environment configuration for one worker invocation.

use std::time::Duration;

use tourbuild_core::report::BackendKind;

/// Default storage prefix the upload bucket is listed under.
const DEFAULT_PREFIX: &str = "image/";

/// Default build script path on the persistent instance.
const DEFAULT_BUILD_SCRIPT: &str = "/opt/tourbuild/build.sh";

/// Default post-boot grace before remote commands (seconds).
const DEFAULT_BOOT_GRACE_SECS: u64 = 60;

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} environment variable is required")]
    Missing { name: &'static str },

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Which backend this deployment dispatches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Persistent build VM driven over the remote-command channel.
    Instance {
        instance_id: String,
        build_script: String,
        /// Submit the build detached instead of waiting on completion.
        fire_and_forget: bool,
    },
    /// Ephemeral containerized build task.
    Task {
        cluster: String,
        task_definition: String,
        container: String,
        subnets: Vec<String>,
        security_group: String,
    },
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Instance { .. } => BackendKind::PersistentInstance,
            Self::Task { .. } => BackendKind::EphemeralTask,
        }
    }
}

/// Full invocation configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Secrets Manager id of the catalog connection secret.
    pub catalog_secret_id: String,
    /// Upload bucket name.
    pub bucket: String,
    /// Storage prefix the listing is scoped to.
    pub prefix: String,
    /// Post-boot grace before remote commands.
    pub boot_grace: Duration,
    pub backend: BackendConfig,
}

impl WorkerConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing { name })
        };

        let backend = match required("TOURBUILD_BACKEND")?.as_str() {
            "instance" => BackendConfig::Instance {
                instance_id: required("TOURBUILD_INSTANCE_ID")?,
                build_script: lookup("TOURBUILD_BUILD_SCRIPT")
                    .unwrap_or_else(|| DEFAULT_BUILD_SCRIPT.to_string()),
                fire_and_forget: match lookup("TOURBUILD_FIRE_AND_FORGET").as_deref() {
                    None | Some("") | Some("false") | Some("0") => false,
                    Some("true") | Some("1") => true,
                    Some(value) => {
                        return Err(ConfigError::Invalid {
                            name: "TOURBUILD_FIRE_AND_FORGET",
                            value: value.to_string(),
                        })
                    }
                },
            },
            "task" => {
                let task_definition = required("TOURBUILD_TASK_DEFINITION")?;
                BackendConfig::Task {
                    cluster: required("TOURBUILD_CLUSTER")?,
                    // The container override name defaults to the family.
                    container: lookup("TOURBUILD_CONTAINER").unwrap_or_else(|| {
                        tourbuild_cloud::guard::family_from_task_definition(&task_definition)
                            .to_string()
                    }),
                    subnets: required("TOURBUILD_SUBNETS")?
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                    security_group: required("TOURBUILD_SECURITY_GROUP")?,
                    task_definition,
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    name: "TOURBUILD_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let boot_grace_secs = match lookup("TOURBUILD_BOOT_GRACE_SECS") {
            None => DEFAULT_BOOT_GRACE_SECS,
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "TOURBUILD_BOOT_GRACE_SECS",
                value,
            })?,
        };

        Ok(Self {
            catalog_secret_id: required("TOURBUILD_CATALOG_SECRET_ARN")?,
            bucket: required("TOURBUILD_BUCKET")?,
            prefix: lookup("TOURBUILD_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            boot_grace: Duration::from_secs(boot_grace_secs),
            backend,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("TOURBUILD_CATALOG_SECRET_ARN", "arn:secret"),
            ("TOURBUILD_BUCKET", "tour-uploads"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<WorkerConfig, ConfigError> {
        WorkerConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn instance_backend_with_defaults() {
        let mut env = base_env();
        env.insert("TOURBUILD_BACKEND", "instance");
        env.insert("TOURBUILD_INSTANCE_ID", "i-123");

        let config = load(&env).unwrap();
        assert_eq!(config.prefix, "image/");
        assert_eq!(config.boot_grace, Duration::from_secs(60));
        assert_matches!(
            config.backend,
            BackendConfig::Instance { instance_id, build_script, fire_and_forget: false }
                if instance_id == "i-123" && build_script == "/opt/tourbuild/build.sh"
        );
    }

    #[test]
    fn task_backend_splits_subnets() {
        let mut env = base_env();
        env.insert("TOURBUILD_BACKEND", "task");
        env.insert("TOURBUILD_CLUSTER", "builds");
        env.insert("TOURBUILD_TASK_DEFINITION", "tour-builder:4");
        env.insert("TOURBUILD_SUBNETS", "subnet-a, subnet-b");
        env.insert("TOURBUILD_SECURITY_GROUP", "sg-1");

        let config = load(&env).unwrap();
        assert_matches!(
            config.backend,
            BackendConfig::Task { container, subnets, .. }
                if container == "tour-builder"
                    && subnets == vec!["subnet-a".to_string(), "subnet-b".to_string()]
        );
    }

    #[test]
    fn missing_backend_is_an_error() {
        let env = base_env();
        assert_matches!(
            load(&env),
            Err(ConfigError::Missing { name: "TOURBUILD_BACKEND" })
        );
    }

    #[test]
    fn unknown_backend_is_invalid() {
        let mut env = base_env();
        env.insert("TOURBUILD_BACKEND", "lambda");
        assert_matches!(
            load(&env),
            Err(ConfigError::Invalid { name: "TOURBUILD_BACKEND", .. })
        );
    }

    #[test]
    fn bad_fire_and_forget_flag_is_invalid() {
        let mut env = base_env();
        env.insert("TOURBUILD_BACKEND", "instance");
        env.insert("TOURBUILD_INSTANCE_ID", "i-123");
        env.insert("TOURBUILD_FIRE_AND_FORGET", "yes");
        assert_matches!(
            load(&env),
            Err(ConfigError::Invalid { name: "TOURBUILD_FIRE_AND_FORGET", .. })
        );
    }

    #[test]
    fn boot_grace_is_configurable() {
        let mut env = base_env();
        env.insert("TOURBUILD_BACKEND", "instance");
        env.insert("TOURBUILD_INSTANCE_ID", "i-123");
        env.insert("TOURBUILD_BOOT_GRACE_SECS", "120");

        let config = load(&env).unwrap();
        assert_eq!(config.boot_grace, Duration::from_secs(120));
    }
}
