use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration
/// Currently validates:
/// - Worker concurrency and all timeouts are non-zero
/// - Queue visibility timeout outlasts a full attempt (provider + storage)
/// - Stale-running threshold outlasts a full attempt when the sweep is enabled
/// - Retry delays and jitter are consistent
/// - Provider endpoint is set when a provider section exists
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Worker validation
    if config.worker.concurrency == 0 {
        return Err(invalid("worker.concurrency cannot be 0"));
    }

    // Executor validation
    let executor = &config.executor;
    for (name, value) in [
        ("executor.attempt_timeout_secs", executor.attempt_timeout_secs),
        ("executor.storage_timeout_secs", executor.storage_timeout_secs),
        ("executor.global_timeout_secs", executor.global_timeout_secs),
        ("executor.cancel_poll_interval_ms", executor.cancel_poll_interval_ms),
        ("queue.visibility_timeout_secs", config.queue.visibility_timeout_secs),
        ("queue.poll_interval_ms", config.queue.poll_interval_ms),
    ] {
        if value == 0 {
            return Err(invalid(format!("{} cannot be 0", name)));
        }
    }

    let attempt_budget = executor
        .attempt_timeout_secs
        .saturating_add(executor.storage_timeout_secs);
    if config.queue.visibility_timeout_secs <= attempt_budget {
        return Err(invalid(format!(
            "queue.visibility_timeout_secs ({}) must exceed executor.attempt_timeout_secs + executor.storage_timeout_secs ({})",
            config.queue.visibility_timeout_secs, attempt_budget
        )));
    }

    // Retry validation
    let retry = &config.retry;
    if !(0.0..=1.0).contains(&retry.jitter_ratio) {
        return Err(invalid(format!(
            "retry.jitter_ratio must be between 0 and 1, got {}",
            retry.jitter_ratio
        )));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(invalid(format!(
            "retry.base_delay_ms ({}) cannot exceed retry.max_delay_ms ({})",
            retry.base_delay_ms, retry.max_delay_ms
        )));
    }

    // Sweep validation
    let sweep = &config.sweep;
    if sweep.enabled {
        if sweep.interval_secs == 0 {
            return Err(invalid("sweep.interval_secs cannot be 0"));
        }
        if sweep.batch_size <= 0 {
            return Err(invalid("sweep.batch_size must be positive"));
        }
        if sweep.stale_running_secs <= attempt_budget {
            return Err(invalid(format!(
                "sweep.stale_running_secs ({}) must exceed executor.attempt_timeout_secs + executor.storage_timeout_secs ({})",
                sweep.stale_running_secs, attempt_budget
            )));
        }
    }

    // Orchestrator validation
    let orchestrator = &config.orchestrator;
    if orchestrator.max_page_size < 1 {
        return Err(invalid("orchestrator.max_page_size must be at least 1"));
    }
    if orchestrator.default_page_size < 1 || orchestrator.default_page_size > orchestrator.max_page_size {
        return Err(invalid(
            "orchestrator.default_page_size must be between 1 and orchestrator.max_page_size",
        ));
    }

    // Provider validation
    if let Some(provider) = &config.provider {
        if provider.endpoint.trim().is_empty() {
            return Err(invalid("provider.endpoint cannot be empty"));
        }
        if provider.timeout_secs == 0 {
            return Err(invalid("provider.timeout_secs cannot be 0"));
        }
    }

    if let Some(metrics) = &config.metrics {
        if metrics.interval_secs == 0 {
            return Err(invalid("metrics.interval_secs cannot be 0"));
        }
    }

    Ok(())
}
