//! Environment variable expansion for string configuration values.

use crate::ConfigError;

/// Expand `${VAR}` and `${VAR:-default}` references in `value`.
///
/// `field` names the configuration key for error messages.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains('$') {
        return Ok(value.to_owned());
    }
    shellexpand::env(value)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| ConfigError::EnvVar {
            field: field.to_owned(),
            message: format!("${{{}}} not set", e.var_name),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_value_untouched() {
        assert_eq!(expand_env("localhost", "server.host").unwrap(), "localhost");
    }

    #[test]
    fn test_default_value_used_when_unset() {
        let value = expand_env("${LVS_TEST_SURELY_UNSET_VAR:-fallback}", "proxy.target").unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn test_missing_variable_is_error() {
        let err = expand_env("${LVS_TEST_SURELY_UNSET_VAR}", "proxy.target").unwrap_err();
        assert!(err.to_string().contains("proxy.target"));
        assert!(err.to_string().contains("LVS_TEST_SURELY_UNSET_VAR"));
    }
}
