//! Package validation
//!
//! Decides whether an APK is a loadable extension before any foreign code runs.
//! Validation is read-only and total: every failure becomes an outcome value.

use std::path::Path;

use super::archive;
use super::metadata;
use super::types::ValidationOutcome;
use crate::core::config::CompatibilityConfig;
use crate::core::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct PackageValidator {
    compatibility: CompatibilityConfig,
}

impl PackageValidator {
    pub fn new(compatibility: CompatibilityConfig) -> Self {
        Self { compatibility }
    }

    pub fn compatibility(&self) -> CompatibilityConfig {
        self.compatibility
    }

    pub fn is_supported(&self, lib_version: f64) -> bool {
        lib_version >= self.compatibility.min_lib_version && lib_version <= self.compatibility.max_lib_version
    }

    /// Fail with `UnsupportedLibVersion` outside the accepted interval
    pub fn check_lib_version(&self, lib_version: f64) -> Result<()> {
        if self.is_supported(lib_version) {
            Ok(())
        } else {
            Err(BridgeError::UnsupportedLibVersion {
                version: lib_version,
                min: self.compatibility.min_lib_version,
                max: self.compatibility.max_lib_version,
            })
        }
    }

    pub fn validate(&self, apk_path: &Path) -> ValidationOutcome {
        if !apk_path.exists() {
            return ValidationOutcome::invalid("File not found");
        }

        match self.inspect(apk_path) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(apk = %apk_path.display(), error = %e, "Validation failed");
                ValidationOutcome::invalid(e.to_string())
            }
        }
    }

    fn inspect(&self, apk_path: &Path) -> Result<ValidationOutcome> {
        let archive = archive::open(apk_path)?;

        if !archive::has_entry(&archive, archive::DEX_ENTRY) {
            return Ok(ValidationOutcome::invalid("No classes.dex found"));
        }
        if !archive::has_entry(&archive, archive::MANIFEST_ENTRY) {
            return Ok(ValidationOutcome::invalid("No AndroidManifest.xml found"));
        }
        drop(archive);

        let metadata = metadata::extract(apk_path)?;

        if !metadata.is_recognized_format {
            return Ok(ValidationOutcome::invalid("Not a Tachiyomi extension"));
        }

        if !self.is_supported(metadata.lib_version) {
            return Ok(ValidationOutcome::UnsupportedVersion {
                lib_version: metadata.lib_version,
            });
        }

        Ok(ValidationOutcome::Valid {
            package_name: metadata.package_name,
            display_name: metadata.display_name,
            lib_version: metadata.lib_version,
        })
    }
}
