// ── Device identity ──
//
// A stable per-install identifier, generated once and persisted next to
// the session store. All backend interactions key on this value.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::error::CoreError;

/// Resolves and persists the device's stable identifier.
pub struct DeviceIdentity {
    path: PathBuf,
}

impl DeviceIdentity {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("device-id"),
        }
    }

    /// Load the persisted identifier, generating and persisting a fresh
    /// UUID on first run.
    ///
    /// Failures map to [`CoreError::DeviceIdUnavailable`] -- a distinct,
    /// retryable condition (identity resolution may lag app start on
    /// some platforms).
    pub fn resolve(&self) -> Result<String, CoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let id = raw.trim();
                if id.is_empty() {
                    self.generate()
                } else {
                    Ok(id.to_owned())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.generate(),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "cannot read device id");
                Err(CoreError::DeviceIdUnavailable)
            }
        }
    }

    fn generate(&self) -> Result<String, CoreError> {
        let id = Uuid::new_v4().to_string();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|_| CoreError::DeviceIdUnavailable)?;
        }
        fs::write(&self.path, &id).map_err(|e| {
            tracing::warn!(error = %e, "cannot persist device id");
            CoreError::DeviceIdUnavailable
        })?;

        info!(device_id = %id, "generated device identity");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_once_then_reuses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = DeviceIdentity::new(dir.path());

        let first = identity.resolve().expect("resolve");
        let second = identity.resolve().expect("resolve again");
        assert_eq!(first, second);

        // A separate instance over the same dir sees the same id.
        let other = DeviceIdentity::new(dir.path());
        assert_eq!(other.resolve().expect("resolve"), first);
    }

    #[test]
    fn regenerates_when_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("device-id"), "  ").expect("write");

        let identity = DeviceIdentity::new(dir.path());
        let id = identity.resolve().expect("resolve");
        assert!(!id.is_empty());
    }
}
