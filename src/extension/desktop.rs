//! Loader for JVM-style desktop runtimes
//!
//! Dex is not loadable here. Every load converts the package to a fresh
//! `<extensions_dir>/<pkg>-<n>.jar`: the dex is extracted to a scratch file, converted,
//! and the APK's assets are merged into the result so resource lookups keep working.
//! A jar a live class loader still reads from is never overwritten. Unloading closes the
//! class loader and deletes its jar.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::archive::{self, ScratchFile};
use super::converter::BytecodeConverter;
use super::foreign::LoaderScope;
use super::runtime::{self, LoaderContext, Platform, RuntimeLoader};
use super::types::{LoadedExtension, ValidationOutcome};
use crate::core::config::CompatibilityConfig;
use crate::core::error::{BridgeError, Result};

/// Convert an APK's dex into a jar at `output`, merging its assets
///
/// The extracted dex never outlives the call. On failure no jar is left at `output`.
pub async fn convert_apk(converter: &dyn BytecodeConverter, apk_path: &Path, output: &Path) -> Result<usize> {
    let dex_path = output.with_extension("dex");
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let dex = ScratchFile::new(&dex_path);
    let apk = apk_path.to_path_buf();
    let target = dex_path.clone();
    runtime::blocking(move || {
        let mut archive = archive::open(&apk)?;
        if !archive::has_entry(&archive, archive::DEX_ENTRY) {
            return Err(BridgeError::Validation("No classes.dex found".to_string()));
        }
        archive::extract_entry(&mut archive, archive::DEX_ENTRY, &target)
    })
    .await?;

    let jar = ScratchFile::new(output);
    converter.convert(dex.path(), jar.path()).await?;
    drop(dex);

    let apk = apk_path.to_path_buf();
    let jar_path = jar.path().to_path_buf();
    let merged = runtime::blocking(move || archive::merge_assets(&apk, &jar_path)).await?;

    tracing::debug!(
        apk = %apk_path.display(),
        jar = %output.display(),
        assets = merged,
        "Converted dex to jar"
    );

    jar.keep();
    Ok(merged)
}

struct LoadedJar {
    scope: Arc<dyn LoaderScope>,
    jar: PathBuf,
}

pub struct DesktopLoader {
    context: LoaderContext,
    loaded: RwLock<HashMap<String, LoadedJar>>,
    generation: AtomicU64,
}

impl DesktopLoader {
    pub fn new(context: LoaderContext) -> Self {
        Self {
            context,
            loaded: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Jar backing the package's live class loader
    pub async fn jar_path(&self, package_name: &str) -> Option<PathBuf> {
        self.loaded.read().await.get(package_name).map(|l| l.jar.clone())
    }

    fn next_jar_path(&self, package_name: &str) -> PathBuf {
        let n = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.context.extensions_dir.join(format!("{}-{}.jar", package_name, n))
    }

    async fn release(package_name: &str, loaded: LoadedJar) {
        runtime::discard_scope(package_name, &loaded.scope);
        if let Err(e) = tokio::fs::remove_file(&loaded.jar).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(package = %package_name, jar = %loaded.jar.display(), error = %e, "Failed to delete jar");
            }
        }
    }
}

#[async_trait]
impl RuntimeLoader for DesktopLoader {
    fn platform(&self) -> Platform {
        Platform::Desktop
    }

    fn compatibility(&self) -> CompatibilityConfig {
        self.context.compatibility
    }

    async fn load_extension(&self, apk_path: &Path) -> Result<LoadedExtension> {
        let validator = self.context.validator();
        let apk = apk_path.to_path_buf();
        let metadata = runtime::blocking(move || runtime::prepare(&apk, &validator)).await?;
        let package = metadata.package_name.clone();

        let jar_path = self.next_jar_path(&package);
        convert_apk(self.context.converter.as_ref(), apk_path, &jar_path).await?;
        let jar = ScratchFile::new(&jar_path);

        let host = self.context.host.clone();
        let apk = apk_path.to_path_buf();
        let extensions_dir = self.context.extensions_dir.clone();
        let module = jar_path.clone();
        let (loaded, scope) = runtime::blocking(move || {
            let scope = host
                .open_scope(&module, &extensions_dir)
                .map_err(|e| BridgeError::Instantiation(format!("Failed to open class loader for {}: {}", package, e)))?;

            let result = runtime::instantiate_sources(&scope, &metadata)
                .and_then(|sources| runtime::finish(metadata, sources, &apk, &scope, &extensions_dir));
            match result {
                Ok(loaded) => Ok((loaded, scope)),
                Err(e) => {
                    runtime::discard_scope(&package, &scope);
                    Err(e)
                }
            }
        })
        .await?;
        jar.keep();

        let package = loaded.metadata.package_name.clone();
        let previous = self.loaded.write().await.insert(
            package.clone(),
            LoadedJar {
                scope,
                jar: jar_path.clone(),
            },
        );
        if let Some(previous) = previous {
            Self::release(&package, previous).await;
        }

        tracing::info!(
            package = %package,
            version = %loaded.metadata.version_name,
            sources = loaded.sources.len(),
            jar = %jar_path.display(),
            "Loaded extension"
        );

        Ok(loaded)
    }

    async fn unload_extension(&self, package_name: &str) -> Result<()> {
        let loaded = self
            .loaded
            .write()
            .await
            .remove(package_name)
            .ok_or_else(|| BridgeError::ExtensionNotLoaded(package_name.to_string()))?;

        Self::release(package_name, loaded).await;

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
        self.loaded.read().await.contains_key(package_name)
    }
}
