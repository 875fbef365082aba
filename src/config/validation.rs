//! Configuration validation.

use crate::config::Config;
use std::time::Duration;

/// Validate the configuration.
///
/// Checks for:
/// - A known log level
/// - A metrics path starting with '/'
/// - Console and metrics servers not sharing an address
/// - A non-zero shutdown grace period and metrics cache TTL
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problem.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if config.metrics.enabled {
        if !config.metrics.path.starts_with('/') {
            errors.push(format!(
                "metrics path '{}' must start with '/'",
                config.metrics.path
            ));
        }

        // Port 0 asks the OS for a free port, so two of them never clash.
        if config.metrics.address == config.console.listen && config.console.listen.port() != 0 {
            errors.push(format!(
                "console and metrics servers cannot share address {}",
                config.console.listen
            ));
        }

        if config.metrics.cache_ttl == Duration::ZERO {
            errors.push("metrics cache_ttl must be greater than zero".to_string());
        }
    }

    if config.shutdown.grace_period == Duration::ZERO {
        errors.push("shutdown grace_period must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
