use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::dispatcher::DispatchPolicy;

#[derive(Deserialize, Clone, Debug)]
pub struct Configuration {
    pub application: ApplicationSettings,
    pub database: DatabaseConfigs,
    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub name: String,
    #[serde(default)]
    pub dispatch_policy: DispatchPolicy,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfigs {
    pub username: String,
    pub password: Secret<String>,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default)]
    pub require_ssl: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct WorkerSettings {
    /// How long to wait before polling an empty queue again.
    pub idle_poll_seconds: u64,
    /// Upper bound for the exponential backoff after a failed task.
    pub max_backoff_seconds: u64,
}

impl WorkerSettings {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_seconds)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            idle_poll_seconds: 10,
            max_backoff_seconds: 60,
        }
    }
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}

/// Reads `configuration/base.yaml`, then the file for `APP_ENVIRONMENT`
/// (`local` by default), then `APP_`-prefixed environment variables such as
/// `APP_DATABASE__PORT=5433`.
pub fn get_config() -> Result<Configuration, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("Failed to read current dir: {e}")))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let configs = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    configs.try_deserialize::<Configuration>()
}

impl DatabaseConfigs {
    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
            .database(&self.database_name)
    }
}
