use super::RetryPolicy;
use crate::core::{Result, SentryError};
use std::path::Path;
use tokio::fs;

const MARKER_ENABLED: &str = "enabled";
const MARKER_DISABLED: &str = "disabled";

/// Resolved on/off state for automatic retries.
///
/// Precedence: an explicit disable wins, then a persisted marker, then the
/// configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryToggle {
    pub explicit_disable: bool,
    pub marker: Option<bool>,
    pub config_default: bool,
}

impl RetryToggle {
    pub fn new(config_default: bool) -> Self {
        Self {
            explicit_disable: false,
            marker: None,
            config_default,
        }
    }

    pub fn with_marker(mut self, marker: Option<bool>) -> Self {
        self.marker = marker;
        self
    }

    pub fn disabled_explicitly(mut self) -> Self {
        self.explicit_disable = true;
        self
    }

    pub fn is_enabled(&self) -> bool {
        if self.explicit_disable {
            return false;
        }
        self.marker.unwrap_or(self.config_default)
    }

    /// Resolves the toggle for `policy`, reading its marker file when one is
    /// configured.
    pub async fn resolve(policy: &RetryPolicy) -> Result<Self> {
        let marker = match &policy.marker_path {
            Some(path) => Self::load_marker(path).await?,
            None => None,
        };
        Ok(Self::new(policy.enabled).with_marker(marker))
    }

    /// Reads a marker file. A missing file means no marker.
    pub async fn load_marker(path: impl AsRef<Path>) -> Result<Option<bool>> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(raw) => match raw.trim() {
                MARKER_ENABLED => Ok(Some(true)),
                MARKER_DISABLED => Ok(Some(false)),
                other => Err(SentryError::ConfigError(format!(
                    "Unrecognized retry marker '{}' in '{}'",
                    other,
                    path.display()
                ))),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn write_marker(path: impl AsRef<Path>, enabled: bool) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let contents = if enabled { MARKER_ENABLED } else { MARKER_DISABLED };
        fs::write(path, contents).await?;
        Ok(())
    }

    pub async fn clear_marker(path: impl AsRef<Path>) -> Result<()> {
        match fs::remove_file(path.as_ref()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
