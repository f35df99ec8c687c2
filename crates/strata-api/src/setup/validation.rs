//! Configuration validation
//!
//! Invalid individual values already fell back to defaults while loading;
//! this only rejects combinations that are unsafe to run with.

use anyhow::Result;
use strata_core::Config;

pub fn validate_config(config: &Config) -> Result<()> {
    if config.is_production() && config.cors_origins.iter().any(|o| o == "*") {
        return Err(anyhow::anyhow!(
            "CORS configured to allow all origins (*) in production. \
            Set specific allowed origins via the CORS_ORIGINS environment variable."
        ));
    }

    // A missing root is not fatal: the location is reported unavailable
    // until the volume is mounted.
    for (index, root) in config.storage.local_roots.iter().enumerate() {
        if !root.is_dir() {
            tracing::warn!(
                location_id = %format!("local-{}", index),
                root = %root.display(),
                "Local storage root does not exist or is not a directory"
            );
        }
    }

    Ok(())
}
