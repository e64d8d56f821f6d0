//! Loader for runtimes that execute dex bytecode natively
//!
//! The APK itself is the loadable module. The host may write optimized code under
//! `<extensions_dir>/dex`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::foreign::LoaderScope;
use super::runtime::{self, LoaderContext, Platform, RuntimeLoader};
use super::types::{LoadedExtension, ValidationOutcome};
use crate::core::config::CompatibilityConfig;
use crate::core::error::{BridgeError, Result};

pub struct ManagedLoader {
    context: LoaderContext,
    scopes: RwLock<HashMap<String, Arc<dyn LoaderScope>>>,
}

impl ManagedLoader {
    pub fn new(context: LoaderContext) -> Self {
        Self {
            context,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    fn code_cache_dir(&self) -> PathBuf {
        self.context.extensions_dir.join("dex")
    }
}

#[async_trait]
impl RuntimeLoader for ManagedLoader {
    fn platform(&self) -> Platform {
        Platform::Managed
    }

    fn compatibility(&self) -> CompatibilityConfig {
        self.context.compatibility
    }

    async fn load_extension(&self, apk_path: &Path) -> Result<LoadedExtension> {
        let apk_path = apk_path.to_path_buf();
        let validator = self.context.validator();
        let host = self.context.host.clone();
        let work_dir = self.code_cache_dir();
        let extensions_dir = self.context.extensions_dir.clone();

        let (loaded, scope) = runtime::blocking(move || {
            let metadata = runtime::prepare(&apk_path, &validator)?;
            let package = metadata.package_name.clone();

            std::fs::create_dir_all(&work_dir)?;
            let scope = host
                .open_scope(&apk_path, &work_dir)
                .map_err(|e| BridgeError::Instantiation(format!("Failed to open class loader for {}: {}", package, e)))?;

            let result = runtime::instantiate_sources(&scope, &metadata)
                .and_then(|sources| runtime::finish(metadata, sources, &apk_path, &scope, &extensions_dir));
            match result {
                Ok(loaded) => Ok((loaded, scope)),
                Err(e) => {
                    runtime::discard_scope(&package, &scope);
                    Err(e)
                }
            }
        })
        .await?;

        let package = loaded.metadata.package_name.clone();
        if let Some(previous) = self.scopes.write().await.insert(package.clone(), scope) {
            runtime::discard_scope(&package, &previous);
        }

        tracing::info!(
            package = %package,
            version = %loaded.metadata.version_name,
            sources = loaded.sources.len(),
            "Loaded extension"
        );

        Ok(loaded)
    }

    async fn unload_extension(&self, package_name: &str) -> Result<()> {
        let scope = self
            .scopes
            .write()
            .await
            .remove(package_name)
            .ok_or_else(|| BridgeError::ExtensionNotLoaded(package_name.to_string()))?;

        // Reclamation is up to the host runtime once the last reference is gone
        runtime::discard_scope(package_name, &scope);
        tracing::info!(package = %package_name, "Unloaded extension");
        Ok(())
    }

    async fn validate_apk(&self, apk_path: &Path) -> ValidationOutcome {
        let apk_path = apk_path.to_path_buf();
        let validator = self.context.validator();
        runtime::blocking(move || Ok(validator.validate(&apk_path)))
            .await
            .unwrap_or_else(|e| ValidationOutcome::invalid(e.to_string()))
    }

    async fn is_loaded(&self, package_name: &str) -> bool {
        self.scopes.read().await.contains_key(package_name)
    }
}
