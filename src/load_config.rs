use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::RemoteConfig;

/// Loads a YAML config file and injects the API token from the environment
/// (`DOCSYNC_TOKEN`) when the file omits it. Returns a validated
/// [`RemoteConfig`] or an error; configuration errors are fatal at startup.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RemoteConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "loading configuration from file");

    let content = fs::read_to_string(path_ref)
        .with_context(|| format!("failed to read config file {path_ref:?}"))?;

    let mut config: RemoteConfig = match serde_yaml::from_str(&content) {
        Ok(config) => {
            info!(config_path = ?path_ref, "parsed config YAML successfully");
            config
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "failed to parse config YAML");
            return Err(anyhow::anyhow!("failed to parse config YAML: {e}"));
        }
    };

    // The token is a secret: prefer the environment over the file.
    if let Ok(token) = std::env::var("DOCSYNC_TOKEN") {
        info!("DOCSYNC_TOKEN found in env, overriding config file token");
        config.token = token;
    }

    config.validate().map_err(|e| {
        error!(error = %e, "configuration failed validation");
        anyhow::anyhow!(e)
    })?;

    info!(
        mappings = config.mappings.len(),
        base_url = %config.base_url,
        "config loaded and validated successfully"
    );

    Ok(config)
}
