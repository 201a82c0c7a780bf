// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::operations::{QueueConfig, StageTimeouts};
use crate::release::DEFAULT_ARTIFACTS_URL;
use crate::retry::RetryPolicy;

/// How the directory client authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorAuth {
    /// Preconfigured bearer token.
    Static(String),
    /// OAuth2 client credentials.
    OAuth {
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: String,
    },
}

/// Provisioner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// GraphQL endpoint of the directory
    pub director_url: String,
    pub director_auth: DirectorAuth,
    /// Gardener project stored in every Gardener config
    pub gardener_project: String,
    /// Kubeconfig of the Gardener project
    pub gardener_kubeconfig_path: PathBuf,
    pub queue: QueueConfig,
    /// Retries of final status writes
    pub status_retry: RetryPolicy,
    pub timeouts: StageTimeouts,
    /// Base URL of on-demand Kyma artifacts
    pub on_demand_artifacts_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PROVISIONER_DATABASE_URL`: SQLite connection string
    /// - `PROVISIONER_DIRECTOR_URL`: directory GraphQL endpoint
    /// - `PROVISIONER_DIRECTOR_TOKEN` unless `PROVISIONER_DIRECTOR_OAUTH_TOKEN_URL` is set,
    ///   in which case `..._OAUTH_CLIENT_ID` and `..._OAUTH_CLIENT_SECRET` are required
    /// - `PROVISIONER_GARDENER_PROJECT`, `PROVISIONER_GARDENER_KUBECONFIG_PATH`
    ///
    /// Optional (with defaults):
    /// - `PROVISIONER_QUEUE_WORKERS` (default: 5)
    /// - `PROVISIONER_STATUS_RETRY_ATTEMPTS` (default: 3)
    /// - `PROVISIONER_STATUS_RETRY_INTERVAL_SECS` (default: 5)
    /// - `PROVISIONER_CLUSTER_CREATION_TIMEOUT_MINS` (default: 60)
    /// - `PROVISIONER_INSTALLATION_TIMEOUT_MINS` (default: 50)
    /// - `PROVISIONER_RUNTIME_AGENT_TIMEOUT_MINS` (default: 10)
    /// - `PROVISIONER_ON_DEMAND_ARTIFACTS_URL`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let queue_defaults = QueueConfig::default();
        let retry_defaults = RetryPolicy::default();
        let timeout_defaults = StageTimeouts::default();

        Ok(Self {
            database_url: vars.required("PROVISIONER_DATABASE_URL")?,
            director_url: vars.required("PROVISIONER_DIRECTOR_URL")?,
            director_auth: director_auth(&vars)?,
            gardener_project: vars.required("PROVISIONER_GARDENER_PROJECT")?,
            gardener_kubeconfig_path: vars
                .required("PROVISIONER_GARDENER_KUBECONFIG_PATH")?
                .into(),
            queue: QueueConfig {
                workers: vars.parsed("PROVISIONER_QUEUE_WORKERS", queue_defaults.workers)?,
                ..queue_defaults
            },
            status_retry: RetryPolicy {
                attempts: vars.parsed(
                    "PROVISIONER_STATUS_RETRY_ATTEMPTS",
                    retry_defaults.attempts,
                )?,
                interval: Duration::from_secs(vars.parsed(
                    "PROVISIONER_STATUS_RETRY_INTERVAL_SECS",
                    retry_defaults.interval.as_secs(),
                )?),
            },
            timeouts: StageTimeouts {
                cluster_creation: vars.minutes(
                    "PROVISIONER_CLUSTER_CREATION_TIMEOUT_MINS",
                    timeout_defaults.cluster_creation,
                )?,
                installation: vars.minutes(
                    "PROVISIONER_INSTALLATION_TIMEOUT_MINS",
                    timeout_defaults.installation,
                )?,
                runtime_agent: vars.minutes(
                    "PROVISIONER_RUNTIME_AGENT_TIMEOUT_MINS",
                    timeout_defaults.runtime_agent,
                )?,
                ..timeout_defaults
            },
            on_demand_artifacts_url: vars
                .optional("PROVISIONER_ON_DEMAND_ARTIFACTS_URL")
                .unwrap_or_else(|| DEFAULT_ARTIFACTS_URL.to_string()),
        })
    }
}

fn director_auth<F>(vars: &Vars<F>) -> Result<DirectorAuth, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match vars.optional("PROVISIONER_DIRECTOR_OAUTH_TOKEN_URL") {
        Some(token_url) => Ok(DirectorAuth::OAuth {
            token_url,
            client_id: vars.required("PROVISIONER_DIRECTOR_OAUTH_CLIENT_ID")?,
            client_secret: vars.required("PROVISIONER_DIRECTOR_OAUTH_CLIENT_SECRET")?,
            scope: vars
                .optional("PROVISIONER_DIRECTOR_OAUTH_SCOPE")
                .unwrap_or_default(),
        }),
        None => Ok(DirectorAuth::Static(
            vars.required("PROVISIONER_DIRECTOR_TOKEN")?,
        )),
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Empty values count as unset.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(name) {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: name,
                value,
            }),
            None => Ok(default),
        }
    }

    fn minutes(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let minutes = self.parsed(name, default.as_secs() / 60)?;
        Ok(Duration::from_secs(minutes * 60))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}
