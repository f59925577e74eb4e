// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FfqueueError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FfqueueError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_queue(cfg)?;
    validate_output(cfg)?;
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.core.trim().is_empty() {
        return Err(FfqueueError::ConfigError(
            "[engine].core must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_queue(cfg: &RawConfigFile) -> Result<()> {
    if cfg.queue.channel_capacity == 0 {
        return Err(FfqueueError::ConfigError(
            "[queue].channel_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_output(cfg: &RawConfigFile) -> Result<()> {
    let out = &cfg.output;

    if !out.input_dir.starts_with('/') || out.input_dir.trim_end_matches('/').is_empty() {
        return Err(FfqueueError::ConfigError(format!(
            "[output].input_dir must be an absolute directory other than '/' (got '{}')",
            out.input_dir
        )));
    }

    if out.file_name.trim().is_empty() || out.file_name.contains('/') {
        return Err(FfqueueError::ConfigError(format!(
            "[output].file_name must be a bare file name (got '{}')",
            out.file_name
        )));
    }

    if out.mime_type.trim().is_empty() {
        return Err(FfqueueError::ConfigError(
            "[output].mime_type must not be empty".to_string(),
        ));
    }

    Ok(())
}
