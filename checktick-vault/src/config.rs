//! Vault configuration.

use crate::error::{VaultError, VaultResult};
use checktick_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration for [`SurveyVault`](crate::SurveyVault).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// How long a session unlock stays valid after verification (seconds).
    pub session_ttl_secs: u64,

    /// Argon2id parameters for new password and recovery-phrase wraps.
    pub kdf: KdfParams,

    /// Optional server-side secret mixed into session credential keys.
    pub session_secret: Option<String>,

    /// Interval of the background sweep of expired session unlocks (seconds).
    pub sweep_interval_secs: u64,

    /// Minimum accepted survey password length.
    pub min_password_len: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 30 * 60,
            kdf: KdfParams::default(),
            session_secret: None,
            sweep_interval_secs: 300,
            min_password_len: 8,
        }
    }
}

impl VaultConfig {
    /// Parses a JSON config document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> VaultResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.session_ttl_secs == 0 {
            return Err(VaultError::Config("session_ttl_secs must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(VaultError::Config("sweep_interval_secs must be positive".into()));
        }
        if !self.kdf.is_within_limits() {
            return Err(VaultError::Config(format!("kdf parameters out of range: {:?}", self.kdf)));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        i64::try_from(self.session_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Cheap KDF settings for tests.
    pub fn for_tests() -> Self {
        Self {
            kdf: KdfParams::low_cost(),
            ..Self::default()
        }
    }
}
