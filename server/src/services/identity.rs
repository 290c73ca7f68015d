//! Device identity normalization.
//!
//! Every place a device identity enters the system (registration, watch
//! requests, heartbeats, REST paths, persistence keys, fanout addressing)
//! must go through [`DeviceIdentity::normalize`] so that two differently
//! formatted renditions of the same id can never diverge into separate
//! registry entries.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// Canonical device identity: trimmed, ASCII-lowercased, non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Canonicalize a raw device identifier.
    ///
    /// Fails with [`AppError::InvalidIdentity`] when the input is empty or
    /// whitespace-only; the offending message should be dropped by the
    /// caller without mutating any state.
    pub fn normalize(raw: &str) -> Result<Self, AppError> {
        let cleaned = raw.trim().to_lowercase();
        if cleaned.is_empty() {
            return Err(AppError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }
        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_trims_and_lowercases() {
        let id = DeviceIdentity::normalize("  DEV-001 ").unwrap();
        assert_eq!(id.as_str(), "dev-001");
    }

    #[test]
    fn test_case_variants_collapse() {
        let a = DeviceIdentity::normalize("dev-001").unwrap();
        let b = DeviceIdentity::normalize("DEV-001 ").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert!(DeviceIdentity::normalize("").is_err());
        assert!(DeviceIdentity::normalize("   \t ").is_err());
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in "[ -~]{0,64}") {
            if let Ok(once) = DeviceIdentity::normalize(&raw) {
                let twice = DeviceIdentity::normalize(once.as_str()).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
