//! Environment variable loading utilities
//!
//! Helpers for reading and parsing `FLOWGRAPH_*` style variables. A variable
//! that is present but malformed is a configuration error, never silently
//! ignored.

use crate::error::{GraphError, Result};
use std::env;
use std::str::FromStr;

/// Load an environment variable as a string
///
/// * `Ok(Some(value))` if the variable exists
/// * `Ok(None)` if it does not
/// * `Err` if it exists but is not valid UTF-8
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(GraphError::Configuration(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Load and parse an environment variable
///
/// ```rust,ignore
/// let parallelism: Option<usize> = get_env_parse("FLOWGRAPH_MAX_PARALLELISM")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.trim().parse::<T>().map_err(|e| {
                GraphError::Configuration(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Load and parse an environment variable, falling back to `default` when unset
pub fn get_env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(get_env_parse(key)?.unwrap_or(default))
}

/// Load a boolean environment variable
///
/// Recognizes "true", "1", "yes", "on" and "false", "0", "no", "off"
/// (case-insensitive).
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(GraphError::Configuration(format!(
                "Invalid boolean value for {}: {}",
                key, val
            ))),
        },
        None => Ok(None),
    }
}

/// `prefix` + uppercased `name`, e.g. `("FLOWGRAPH_", "write_behind")` -> `FLOWGRAPH_WRITE_BEHIND`
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_missing() {
        assert!(get_env("FLOWGRAPH_TEST_MISSING_VAR_12345").unwrap().is_none());
    }

    #[test]
    fn test_get_env_parse() {
        env::set_var("FLOWGRAPH_TEST_NUMBER", " 42 ");
        let result: Option<u32> = get_env_parse("FLOWGRAPH_TEST_NUMBER").unwrap();
        assert_eq!(result, Some(42));
        env::remove_var("FLOWGRAPH_TEST_NUMBER");
    }

    #[test]
    fn test_get_env_parse_invalid() {
        env::set_var("FLOWGRAPH_TEST_INVALID_NUMBER", "many");
        let result: Result<Option<u32>> = get_env_parse("FLOWGRAPH_TEST_INVALID_NUMBER");
        assert!(matches!(result, Err(GraphError::Configuration(_))));
        env::remove_var("FLOWGRAPH_TEST_INVALID_NUMBER");
    }

    #[test]
    fn test_get_env_parse_or() {
        assert_eq!(get_env_parse_or("FLOWGRAPH_TEST_MISSING_VAR_12345", 7u64).unwrap(), 7);
    }

    #[test]
    fn test_get_env_bool() {
        env::set_var("FLOWGRAPH_TEST_BOOL_ON", "On");
        env::set_var("FLOWGRAPH_TEST_BOOL_BAD", "maybe");
        assert_eq!(get_env_bool("FLOWGRAPH_TEST_BOOL_ON").unwrap(), Some(true));
        assert!(get_env_bool("FLOWGRAPH_TEST_BOOL_BAD").is_err());
        env::remove_var("FLOWGRAPH_TEST_BOOL_ON");
        env::remove_var("FLOWGRAPH_TEST_BOOL_BAD");
    }

    #[test]
    fn test_build_env_key() {
        assert_eq!(build_env_key("FLOWGRAPH_", "write_behind"), "FLOWGRAPH_WRITE_BEHIND");
    }
}
