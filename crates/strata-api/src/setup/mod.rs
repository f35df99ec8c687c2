//! Application setup and initialization

pub mod routes;
pub mod server;
pub mod services;
pub mod validation;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use strata_core::Config;
use strata_infra::{init_telemetry, LogFormat};

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    init_telemetry(LogFormat::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    // Configuration is read before the subscriber exists, so fallbacks are
    // reported here.
    for warning in config.warnings() {
        tracing::warn!(warning = %warning, "Configuration value replaced by default");
    }

    validation::validate_config(&config).context("Configuration validation failed")?;
    tracing::info!("Configuration loaded and validated successfully");

    let state = services::initialize_services(&config);

    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}
