use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Concurrency limits and timeouts are positive
/// - Every retry policy allows at least one attempt and never shrinks its backoff
/// - Invoker URL is set
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.orchestrator.max_concurrent_items == 0 {
        return Err(invalid("orchestrator.max_concurrent_items must be greater than 0"));
    }

    if config.orchestrator.notify_timeout_ms == 0 {
        return Err(invalid("orchestrator.notify_timeout_ms must be greater than 0"));
    }

    if config.orchestrator.event_buffer == 0 || config.orchestrator.progress_buffer == 0 {
        return Err(invalid(
            "orchestrator.event_buffer and orchestrator.progress_buffer must be greater than 0",
        ));
    }

    for (step, policy) in config.retry.iter() {
        if policy.max_attempts == 0 {
            return Err(invalid(&format!(
                "retry.{}.max_attempts must be at least 1",
                step
            )));
        }
        if !(policy.backoff_multiplier >= 1.0) {
            return Err(invalid(&format!(
                "retry.{}.backoff_multiplier must be at least 1.0",
                step
            )));
        }
        if policy.base_interval_ms > policy.max_interval_ms {
            return Err(invalid(&format!(
                "retry.{}.base_interval_ms cannot exceed max_interval_ms",
                step
            )));
        }
    }

    if config.invoker.url.trim().is_empty() {
        return Err(invalid("invoker.url cannot be empty"));
    }

    if config.invoker.timeout_secs == 0 {
        return Err(invalid("invoker.timeout_secs must be greater than 0"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
