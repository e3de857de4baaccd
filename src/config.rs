//! Process configuration.
//!
//! Configuration is read exactly once, at startup, and the resulting
//! [`Settings`] value is passed explicitly to whatever needs it (the upload
//! root goes into [`UploadStore::open`](crate::store::UploadStore::open)).
//! There is deliberately no global settings object: per-test configuration
//! just means constructing a different `Settings`.

use std::{
    env,
    ffi::OsString,
    path::PathBuf,
};

use anyhow::{Context, Result};
use log::info;

use crate::secrets::{self, SecretKind};

/// Environment variable naming the upload root directory.
pub const UPLOAD_DIR_VAR: &str = "UPLOAD_DIR";

/// Environment variable holding the JWT signing key.
pub const SECRET_KEY_VAR: &str = "SECRET_KEY";

/// Subdirectory of the platform temp directory used when `UPLOAD_DIR` is
/// not set.
const FALLBACK_SUBDIR: &str = "avatarstore-uploads";

/// Immutable process-wide configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for stored uploads.  Absolute or relative; the store
    /// canonicalizes it when it provisions the directory.
    pub upload_dir: PathBuf,
    /// JWT signing key, if configured.  Always strength-validated.
    pub secret_key: Option<String>,
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// `UPLOAD_DIR` falls back to a fixed subdirectory of the platform temp
    /// directory.  `SECRET_KEY`, when present, must pass JWT-key strength
    /// validation; a weak key is a startup error, not a warning.
    pub fn from_env() -> Result<Self> {
        Self::resolve(env::var_os(UPLOAD_DIR_VAR), env::var(SECRET_KEY_VAR).ok())
    }

    fn resolve(upload_dir: Option<OsString>, secret_key: Option<String>) -> Result<Self> {
        let upload_dir = match upload_dir {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => env::temp_dir().join(FALLBACK_SUBDIR),
        };

        if let Some(ref key) = secret_key {
            secrets::validate_strength(key, SecretKind::JwtKey).with_context(|| {
                format!(
                    "{SECRET_KEY_VAR} ({}) failed strength validation",
                    secrets::mask(key)
                )
            })?;
        }

        info!("upload directory configured as {}", upload_dir.display());
        Ok(Settings {
            upload_dir,
            secret_key,
        })
    }
}
