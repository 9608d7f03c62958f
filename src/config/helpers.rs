//! Environment lookup helpers used by the config sections.

use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating unset and empty as `None`.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, optional_env(key)?, default)
}

/// Read a boolean environment variable (`true`/`false`/`1`/`0`).
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("must be 'true' or 'false', got '{}'", raw),
            }),
        },
    }
}

fn parse_value<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{}': {}", raw, e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_variable_uses_default() {
        let port: u16 =
            parse_optional_env("SIMPLE_JDBC_TEST_SURELY_UNSET_VARIABLE", 8000).unwrap();
        assert_eq!(port, 8000);
        assert!(!parse_bool_env("SIMPLE_JDBC_TEST_SURELY_UNSET_VARIABLE", false).unwrap());
    }

    #[test]
    fn test_parse_value_rejects_garbage() {
        let err = parse_value::<u16>("SIMPLE_JDBC_PORT", Some("eighty".to_string()), 8000)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SIMPLE_JDBC_PORT"));
    }

    #[test]
    fn test_parse_value_accepts_number() {
        let port = parse_value::<u16>("SIMPLE_JDBC_PORT", Some("9000".to_string()), 8000).unwrap();
        assert_eq!(port, 9000);
    }
}
