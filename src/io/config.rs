//! JSON run configuration loader.

use std::fs;
use std::path::Path;

use crate::domain::RunConfig;
use crate::error::AppError;

pub fn load_run_config(path: &Path) -> Result<RunConfig, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("Failed to read config '{}': {e}", path.display())))?;
    parse_run_config(&raw).map_err(|e| AppError::config(format!("{}: {}", path.display(), e.message())))
}

pub fn parse_run_config(raw: &str) -> Result<RunConfig, AppError> {
    let config: RunConfig =
        serde_json::from_str(raw).map_err(|e| AppError::config(format!("Invalid run config: {e}")))?;
    if config.options.nfits == 0 {
        return Err(AppError::config("`options.nfits` must be at least 1."));
    }
    if config.options.max_steps == 0 {
        return Err(AppError::config("`options.max_steps` must be at least 1."));
    }
    Ok(config)
}
