//! Runtime loaders
//!
//! One [`RuntimeLoader`] implementation per host runtime, chosen once at startup with
//! [`create_runtime_loader`]. Both share the identity, compatibility and instantiation
//! steps defined here; they differ only in how a package becomes a loadable module.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::adapter::{SourceAdapter, SourceHandle};
use super::archive;
use super::converter::BytecodeConverter;
use super::factory;
use super::foreign::{ClassLoaderHost, LoaderScope};
use super::metadata;
use super::types::{ExtensionMetadata, LoadedExtension, ValidationOutcome};
use super::validator::PackageValidator;
use super::{desktop::DesktopLoader, managed::ManagedLoader};
use crate::core::config::CompatibilityConfig;
use crate::core::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Runtime that executes dex bytecode natively
    Managed,
    /// JVM-style runtime that needs dex converted to jar first
    Desktop,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(target_os = "android") {
            Platform::Managed
        } else {
            Platform::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Managed => "managed",
            Platform::Desktop => "desktop",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load and unload packages on one host runtime
#[async_trait]
pub trait RuntimeLoader: Send + Sync {
    fn platform(&self) -> Platform;

    /// Accepted extension-lib version range
    fn compatibility(&self) -> CompatibilityConfig;

    /// Materialize a package and wrap each of its sources
    ///
    /// Does not touch the source registry. On failure no loader scope is retained.
    async fn load_extension(&self, apk_path: &Path) -> Result<LoadedExtension>;

    /// Drop the package's loader scope, closing it before returning
    async fn unload_extension(&self, package_name: &str) -> Result<()>;

    async fn validate_apk(&self, apk_path: &Path) -> ValidationOutcome;

    async fn is_loaded(&self, package_name: &str) -> bool;
}

/// Collaborators shared by every runtime loader
#[derive(Clone)]
pub struct LoaderContext {
    pub host: Arc<dyn ClassLoaderHost>,
    pub converter: Arc<dyn BytecodeConverter>,
    pub compatibility: CompatibilityConfig,
    pub extensions_dir: PathBuf,
}

impl LoaderContext {
    pub fn validator(&self) -> PackageValidator {
        PackageValidator::new(self.compatibility)
    }
}

pub fn create_runtime_loader(platform: Platform, context: LoaderContext) -> Arc<dyn RuntimeLoader> {
    tracing::info!(
        platform = %platform,
        extensions_dir = %context.extensions_dir.display(),
        "Creating runtime loader"
    );

    match platform {
        Platform::Managed => Arc::new(ManagedLoader::new(context)),
        Platform::Desktop => Arc::new(DesktopLoader::new(context)),
    }
}

/// Run blocking archive or foreign work off the async executor
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::Io(std::io::Error::other(format!("Task join error: {}", e))))?
}

/// Identity and compatibility checks run before any foreign code
pub(crate) fn prepare(apk_path: &Path, validator: &PackageValidator) -> Result<ExtensionMetadata> {
    if !apk_path.exists() {
        return Err(BridgeError::PackageNotFound(apk_path.display().to_string()));
    }

    let metadata = metadata::extract(apk_path)?;
    if !metadata.is_recognized_format {
        return Err(BridgeError::Validation(format!(
            "{} is not a Tachiyomi extension",
            metadata.package_name
        )));
    }
    validator.check_lib_version(metadata.lib_version)?;

    if metadata.is_heuristic {
        tracing::warn!(
            package = %metadata.package_name,
            apk = %apk_path.display(),
            "Loading with metadata guessed from the file name"
        );
    }

    Ok(metadata)
}

/// Instantiate the entry class and adapt every source it yields
pub(crate) fn instantiate_sources(scope: &Arc<dyn LoaderScope>, metadata: &ExtensionMetadata) -> Result<Vec<SourceHandle>> {
    let package = &metadata.package_name;
    let entry_class = metadata
        .entry_class
        .as_deref()
        .ok_or_else(|| BridgeError::Instantiation(format!("{} declares no entry class", package)))?;

    let class = scope
        .load_class(entry_class)
        .map_err(|e| BridgeError::Instantiation(format!("Entry class {} not loadable: {}", entry_class, e)))?;
    let instance = class
        .construct(&[])
        .map_err(|e| BridgeError::Instantiation(format!("Failed to instantiate {}: {}", entry_class, e)))?;
    let foreign_sources = factory::resolve(instance)
        .map_err(|e| BridgeError::Instantiation(format!("Source factory {} failed: {}", entry_class, e)))?;

    let weak_scope = Arc::downgrade(scope);
    let handles: Vec<SourceHandle> = foreign_sources
        .into_iter()
        .map(|source| Arc::new(SourceAdapter::new(package.clone(), source, weak_scope.clone())))
        .collect();

    tracing::debug!(package = %package, sources = handles.len(), "Instantiated sources");
    Ok(handles)
}

/// Assemble the loaded extension once its scope is live
pub(crate) fn finish(
    metadata: ExtensionMetadata,
    sources: Vec<SourceHandle>,
    apk_path: &Path,
    scope: &Arc<dyn LoaderScope>,
    extensions_dir: &Path,
) -> Result<LoadedExtension> {
    let icon_path = archive::extract_icon(apk_path, extensions_dir, &metadata.package_name);
    let checksum = archive::checksum(apk_path)?;

    Ok(LoadedExtension {
        metadata,
        sources,
        apk_path: apk_path.to_path_buf(),
        icon_path,
        checksum,
        scope: Arc::downgrade(scope),
    })
}

/// Close a scope whose package failed to load
pub(crate) fn discard_scope(package_name: &str, scope: &Arc<dyn LoaderScope>) {
    if let Err(e) = scope.close() {
        tracing::warn!(package = %package_name, error = %e, "Failed to close loader scope");
    }
}
