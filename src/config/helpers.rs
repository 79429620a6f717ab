//! Environment lookup helpers shared by the settings resolvers.

use std::env::VarError;
use std::str::FromStr;

use crate::error::ConfigError;

/// Read an optional variable through `lookup`. Unset and empty values are
/// both treated as absent.
pub(crate) fn optional_env<L>(lookup: &L, key: &str) -> Result<Option<String>, ConfigError>
where
    L: Fn(&str) -> Result<String, VarError>,
{
    match lookup(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_string(),
        }),
    }
}

/// Read and parse an optional variable. `expected` describes the accepted
/// format in the error message.
pub(crate) fn parse_optional_env<L, T>(
    lookup: &L,
    key: &str,
    expected: &str,
) -> Result<Option<T>, ConfigError>
where
    L: Fn(&str) -> Result<String, VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(lookup, key)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be {expected}: {e}"),
        })
}

/// Parse a boolean flag, accepting `1`/`0`, `yes`/`no` and `on`/`off`
/// alongside `true`/`false`.
pub(crate) fn parse_bool_env<L>(lookup: &L, key: &str) -> Result<Option<bool>, ConfigError>
where
    L: Fn(&str) -> Result<String, VarError>,
{
    let Some(value) = optional_env(lookup, key)? else {
        return Ok(None);
    };

    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be 'true' or 'false', got '{value}'"),
        }),
    }
}
