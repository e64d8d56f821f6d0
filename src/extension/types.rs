//! Extension data model
//!
//! Identity, validation and lifecycle types shared by the loaders and the lifecycle
//! manager.

use std::fmt;
use std::path::PathBuf;
use std::sync::Weak;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::adapter::SourceHandle;
use super::catalogue::CatalogueSource;
use super::foreign::LoaderScope;

/// Identity fields of a package
///
/// `package_name` is the only stable identity. When `is_heuristic` is set every other
/// field was guessed from the file name and is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    pub package_name: String,
    pub display_name: String,
    pub version_name: String,
    pub version_code: i64,
    pub lang: String,
    pub is_nsfw: bool,
    pub is_recognized_format: bool,
    pub is_heuristic: bool,
    /// Fully-qualified class instantiated at load time
    pub entry_class: Option<String>,
    pub lib_version: f64,
}

/// Result of inspecting a package without loading it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid {
        package_name: String,
        display_name: String,
        lib_version: f64,
    },
    Invalid {
        reason: String,
    },
    UnsupportedVersion {
        lib_version: f64,
    },
}

impl ValidationOutcome {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ValidationOutcome::Invalid { reason: reason.into() }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationOutcome::Valid { package_name, display_name, lib_version } => {
                write!(f, "valid: {} ({}) lib {}", display_name, package_name, lib_version)
            }
            ValidationOutcome::Invalid { reason } => write!(f, "invalid: {}", reason),
            ValidationOutcome::UnsupportedVersion { lib_version } => {
                write!(f, "unsupported lib version {}", lib_version)
            }
        }
    }
}

/// Per-package lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtensionState {
    Unloaded,
    Validating,
    Loading,
    Registered,
    Unloading,
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtensionState::Unloaded => "unloaded",
            ExtensionState::Validating => "validating",
            ExtensionState::Loading => "loading",
            ExtensionState::Registered => "registered",
            ExtensionState::Unloading => "unloading",
        };
        f.write_str(name)
    }
}

/// A package materialized by a runtime loader
///
/// The loader keeps the only strong reference to the loader scope; this value and every
/// adapter it owns observe the scope weakly.
pub struct LoadedExtension {
    pub metadata: ExtensionMetadata,
    pub sources: Vec<SourceHandle>,
    pub apk_path: PathBuf,
    pub icon_path: Option<PathBuf>,
    pub checksum: String,
    pub scope: Weak<dyn LoaderScope>,
}

impl LoadedExtension {
    /// Language of the package as a whole, derived from its sources
    pub fn lang(&self) -> String {
        let mut langs: Vec<&str> = self.sources.iter().map(|s| s.lang()).collect();
        langs.sort_unstable();
        langs.dedup();

        match langs.as_slice() {
            [single] => single.to_string(),
            _ => "all".to_string(),
        }
    }

    pub fn is_scope_alive(&self) -> bool {
        self.scope.upgrade().is_some()
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("package_name", &self.metadata.package_name)
            .field("sources", &self.sources.len())
            .field("apk_path", &self.apk_path)
            .finish()
    }
}

/// Summary of an installed package, as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub package_name: String,
    pub display_name: String,
    pub version_name: String,
    pub version_code: i64,
    pub lang: String,
    pub is_nsfw: bool,
    pub is_heuristic: bool,
    pub lib_version: f64,
    pub apk_path: PathBuf,
    pub icon_path: Option<PathBuf>,
    pub checksum: String,
    pub source_ids: Vec<i64>,
    /// Ids that collided with another package's sources and were not registered
    pub conflicting_source_ids: Vec<i64>,
    pub loaded_at: DateTime<Utc>,
}

impl ExtensionInfo {
    pub fn from_loaded(loaded: &LoadedExtension, registered: Vec<i64>, conflicting: Vec<i64>) -> Self {
        Self {
            package_name: loaded.metadata.package_name.clone(),
            display_name: loaded.metadata.display_name.clone(),
            version_name: loaded.metadata.version_name.clone(),
            version_code: loaded.metadata.version_code,
            lang: loaded.lang(),
            is_nsfw: loaded.metadata.is_nsfw,
            is_heuristic: loaded.metadata.is_heuristic,
            lib_version: loaded.metadata.lib_version,
            apk_path: loaded.apk_path.clone(),
            icon_path: loaded.icon_path.clone(),
            checksum: loaded.checksum.clone(),
            source_ids: registered,
            conflicting_source_ids: conflicting,
            loaded_at: Utc::now(),
        }
    }
}

/// Weak scope handle that never upgrades
#[cfg(test)]
pub(crate) fn dangling_scope() -> Weak<dyn LoaderScope> {
    Weak::<DeadScope>::new() as Weak<dyn LoaderScope>
}

#[cfg(test)]
struct DeadScope;

#[cfg(test)]
impl LoaderScope for DeadScope {
    fn load_class(&self, fqcn: &str) -> Result<super::foreign::ClassRef, super::foreign::ForeignError> {
        Err(super::foreign::ForeignError::ClassNotFound(fqcn.to_string()))
    }

    fn close(&self) -> Result<(), super::foreign::ForeignError> {
        Ok(())
    }
}
