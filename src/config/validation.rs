//! Configuration validation.

use crate::config::Config;

/// Validate the configuration.
///
/// Checks for:
/// - A known log level
/// - Non-empty proxy binary, state path and namespace prefix
/// - A positive worker connection count and resync interval
/// - A root helper that splits as a shell command line
/// - A bridge name that fits an interface name
///
/// # Returns
///
/// `Ok(())` if valid, or all problems joined by `; `.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if config.agent.state_path.as_os_str().is_empty() {
        errors.push("agent state_path cannot be empty".to_string());
    }

    if config.agent.periodic_interval.is_zero() {
        errors.push("agent periodic_interval must be greater than zero".to_string());
    }

    if let Err(e) = shell_words::split(&config.agent.root_helper) {
        errors.push(format!(
            "agent root_helper '{}' is not a valid command line: {}",
            config.agent.root_helper, e
        ));
    }

    if config.proxy.binary.as_os_str().is_empty() {
        errors.push("proxy binary cannot be empty".to_string());
    }

    if config.proxy.namespace_prefix.is_empty() {
        errors.push("proxy namespace_prefix cannot be empty".to_string());
    }

    if config.proxy.worker_connections == 0 {
        errors.push("proxy worker_connections must be >= 1".to_string());
    }

    if config.proxy.user.is_empty() || config.proxy.user_group.is_empty() {
        errors.push("proxy user and user_group cannot be empty".to_string());
    }

    let bridge = &config.interface.bridge;
    if bridge.is_empty() || bridge.len() > 15 {
        errors.push(format!(
            "interface bridge '{}' must be 1 to 15 characters",
            bridge
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.global.log_level = "loud".to_string();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("invalid log level"));
    }

    #[test]
    fn test_zero_interval() {
        let mut config = Config::default();
        config.agent.periodic_interval = Duration::ZERO;
        assert!(validate_config(&config)
            .unwrap_err()
            .contains("periodic_interval"));
    }

    #[test]
    fn test_unbalanced_root_helper() {
        let mut config = Config::default();
        config.agent.root_helper = "sudo 'oops".to_string();
        assert!(validate_config(&config).unwrap_err().contains("root_helper"));
    }

    #[test]
    fn test_empty_root_helper_allowed() {
        let mut config = Config::default();
        config.agent.root_helper = String::new();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_worker_connections() {
        let mut config = Config::default();
        config.proxy.worker_connections = 0;
        assert!(validate_config(&config)
            .unwrap_err()
            .contains("worker_connections"));
    }

    #[test]
    fn test_errors_are_collected() {
        let mut config = Config::default();
        config.proxy.binary = PathBuf::new();
        config.proxy.namespace_prefix = String::new();
        config.interface.bridge = "a-very-long-bridge-name".to_string();

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.split("; ").count(), 3);
        assert!(err.contains("proxy binary"));
        assert!(err.contains("namespace_prefix"));
        assert!(err.contains("bridge"));
    }
}
