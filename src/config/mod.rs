//! Settings resolved from the environment.
//!
//! Every variable is optional. Values that are set but malformed fail with
//! [`ConfigError::InvalidValue`] naming the variable, rather than silently
//! falling back to a default.

mod helpers;

use std::env::VarError;
use std::time::Duration;

use url::Url;

use crate::backend::detect::Platform;
use crate::container::{DEFAULT_POLL_INTERVAL, session_id};
use crate::error::ConfigError;

use self::helpers::{optional_env, parse_bool_env, parse_optional_env};

pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";
pub const ENV_SESSION_ID: &str = "CAPSULE_SESSION_ID";
pub const ENV_REAPER_DISABLED: &str = "CAPSULE_REAPER_DISABLED";
pub const ENV_POLL_INTERVAL_MS: &str = "CAPSULE_POLL_INTERVAL_MS";
pub const ENV_WAIT_TIMEOUT_SECS: &str = "CAPSULE_WAIT_TIMEOUT_SECS";

/// Process-wide defaults applied to every container built with
/// [`ContainerBuilder::with_settings`](crate::container::ContainerBuilder::with_settings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Engine endpoint.
    pub endpoint: Url,
    /// Value of the session label put on every container.
    pub session_id: String,
    /// Whether a reaper removes this session's containers.
    pub reaper_enabled: bool,
    pub poll_interval: Duration,
    pub wait_timeout: Option<Duration>,
}

impl Settings {
    /// Resolve from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(|key| std::env::var(key))
    }

    /// Resolve through `lookup`, which has the signature of
    /// [`std::env::var`].
    pub fn resolve_with<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Result<String, VarError>,
    {
        let endpoint = match optional_env(&lookup, ENV_DOCKER_HOST)? {
            Some(raw) => Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                key: ENV_DOCKER_HOST.to_string(),
                message: format!("must be an endpoint URL such as unix:///var/run/docker.sock: {e}"),
            })?,
            None => Url::parse(Platform::current().default_endpoint()).map_err(|e| {
                ConfigError::InvalidValue {
                    key: ENV_DOCKER_HOST.to_string(),
                    message: format!("platform default is not a URL: {e}"),
                }
            })?,
        };

        let session = optional_env(&lookup, ENV_SESSION_ID)?
            .unwrap_or_else(|| session_id().to_string());

        let reaper_enabled = !parse_bool_env(&lookup, ENV_REAPER_DISABLED)?.unwrap_or(false);

        let poll_interval = match parse_optional_env::<_, u64>(
            &lookup,
            ENV_POLL_INTERVAL_MS,
            "a positive number of milliseconds",
        )? {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: ENV_POLL_INTERVAL_MS.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_POLL_INTERVAL,
        };

        let wait_timeout = parse_optional_env::<_, u64>(
            &lookup,
            ENV_WAIT_TIMEOUT_SECS,
            "a number of seconds",
        )?
        .map(Duration::from_secs);

        Ok(Self {
            endpoint,
            session_id: session,
            reaper_enabled,
            poll_interval,
            wait_timeout,
        })
    }
}
