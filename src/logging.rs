//! # Structured Logging Module
//!
//! Environment-aware structured logging for long-running workflows. Every
//! helper emits a single `tracing` event with typed fields so that task, step
//! and remote-call activity can be correlated by `task_id` and `resource_id`.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-derived defaults
pub fn init_structured_logging() {
    init_with_config(&LoggingConfig::default());
}

/// Initialize structured logging; later calls are no-ops
pub fn init_with_config(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment).to_string());

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .boxed(),
        };

        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            // Embedding applications may install their own subscriber first.
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            level = %level,
            format = ?config.format,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("ORCHESTRATOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log a task lifecycle event
pub fn log_task_operation(
    operation: &str,
    task_id: Uuid,
    resource_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        resource_id = resource_id,
        status = %status,
        details = details,
        "TASK_OPERATION"
    );
}

/// Log a step lifecycle event
pub fn log_step_operation(
    operation: &str,
    task_id: Uuid,
    step_id: &str,
    step_index: usize,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        step_id = %step_id,
        step_index = step_index,
        status = %status,
        details = details,
        "STEP_OPERATION"
    );
}

/// Log a call against a remote platform
pub fn log_remote_operation(
    platform: &str,
    operation: &str,
    kind: &str,
    ext_id: Option<&str>,
    status: &str,
) {
    tracing::debug!(
        platform = %platform,
        operation = %operation,
        kind = %kind,
        ext_id = ext_id,
        status = %status,
        "REMOTE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        "ERROR"
    );
}
