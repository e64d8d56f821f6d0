//! Extension lifecycle manager
//!
//! Owns the source registry and drives every package through
//! `Unloaded -> Validating -> Loading -> Registered -> Unloading -> Unloaded`.
//! Operations on one package are serialized by a per-package lock; different packages
//! load concurrently and share nothing but the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock as StdRwLock};

use tokio::sync::{OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::adapter::SourceHandle;
use super::archive::{FileBackup, ScratchFile};
use super::catalogue::CatalogueSource;
use super::metadata;
use super::registry::{RegistryRow, SourceRegistry};
use super::repository::{self, ExtensionListing, ExtensionUpdate, RepositoryStore};
use super::runtime::{self, RuntimeLoader};
use super::types::{ExtensionInfo, ExtensionState, LoadedExtension, ValidationOutcome};
use crate::core::error::{BridgeError, Result};
use crate::core::http::HttpClient;

struct ManagedExtension {
    loaded: LoadedExtension,
    info: ExtensionInfo,
}

pub struct LifecycleManager {
    loader: Arc<dyn RuntimeLoader>,
    http: Arc<dyn HttpClient>,
    repositories: RepositoryStore,
    extensions_dir: PathBuf,
    registry: Arc<SourceRegistry>,
    extensions: RwLock<HashMap<String, ManagedExtension>>,
    states: StdRwLock<HashMap<String, ExtensionState>>,
    package_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(
        loader: Arc<dyn RuntimeLoader>,
        http: Arc<dyn HttpClient>,
        repositories: RepositoryStore,
        extensions_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            loader,
            http,
            repositories,
            extensions_dir: extensions_dir.into(),
            registry: Arc::new(SourceRegistry::new()),
            extensions: RwLock::new(HashMap::new()),
            states: StdRwLock::new(HashMap::new()),
            package_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn repositories(&self) -> &RepositoryStore {
        &self.repositories
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    async fn lock_package(&self, package_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.package_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(package_name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn set_state(&self, package_name: &str, state: ExtensionState) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        if state == ExtensionState::Unloaded {
            states.remove(package_name);
        } else {
            states.insert(package_name.to_string(), state);
        }
        tracing::debug!(package = %package_name, state = %state, "Extension state changed");
    }

    pub fn extension_state(&self, package_name: &str) -> ExtensionState {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(package_name)
            .copied()
            .unwrap_or(ExtensionState::Unloaded)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validate, load and register the package at `apk_path`
    ///
    /// A package that is already registered keeps serving its sources until the new
    /// archive has loaded, then its registry rows are swapped in one step. On failure
    /// the registry is left exactly as it was and the previous version, if any, stays
    /// `Registered`.
    pub async fn load_extension(&self, apk_path: &Path) -> Result<ExtensionInfo> {
        if !apk_path.exists() {
            return Err(BridgeError::PackageNotFound(apk_path.display().to_string()));
        }

        let peek = apk_path.to_path_buf();
        let package = runtime::blocking(move || metadata::extract(&peek))
            .await?
            .package_name;
        let _guard = self.lock_package(&package).await;

        let was_registered = self.extensions.read().await.contains_key(&package);
        let fallback = if was_registered {
            tracing::info!(package = %package, "Reloading registered extension");
            ExtensionState::Registered
        } else {
            ExtensionState::Unloaded
        };

        self.set_state(&package, ExtensionState::Validating);
        match self.loader.validate_apk(apk_path).await {
            ValidationOutcome::Valid { .. } => {}
            ValidationOutcome::Invalid { reason } => {
                self.set_state(&package, fallback);
                return Err(BridgeError::Validation(reason));
            }
            ValidationOutcome::UnsupportedVersion { lib_version } => {
                self.set_state(&package, fallback);
                let compatibility = self.loader.compatibility();
                return Err(BridgeError::UnsupportedLibVersion {
                    version: lib_version,
                    min: compatibility.min_lib_version,
                    max: compatibility.max_lib_version,
                });
            }
        }

        self.set_state(&package, ExtensionState::Loading);
        let loaded = match self.loader.load_extension(apk_path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(package = %package, apk = %apk_path.display(), error = %e, "Failed to load extension");
                self.set_state(&package, fallback);
                return Err(e);
            }
        };

        // The loader has already released the previous version's scope
        let info = self.register(loaded).await;
        self.set_state(&package, ExtensionState::Registered);

        tracing::info!(
            package = %info.package_name,
            version = %info.version_name,
            sources = info.source_ids.len(),
            conflicts = info.conflicting_source_ids.len(),
            replaced = was_registered,
            "Extension registered"
        );
        Ok(info)
    }

    fn catalogue_sources(loaded: &LoadedExtension) -> Vec<SourceHandle> {
        loaded
            .sources
            .iter()
            .filter(|s| s.is_catalogue_source())
            .cloned()
            .collect()
    }

    async fn register(&self, loaded: LoadedExtension) -> ExtensionInfo {
        let package = loaded.metadata.package_name.clone();
        let registration = self
            .registry
            .replace_package(&package, &Self::catalogue_sources(&loaded));
        let info = ExtensionInfo::from_loaded(&loaded, registration.registered, registration.conflicts);

        self.extensions.write().await.insert(
            package,
            ManagedExtension {
                loaded,
                info: info.clone(),
            },
        );
        info
    }

    /// Unregister and unload a package
    pub async fn unload_extension(&self, package_name: &str) -> Result<()> {
        let _guard = self.lock_package(package_name).await;
        if !self.extensions.read().await.contains_key(package_name) {
            return Err(BridgeError::ExtensionNotLoaded(package_name.to_string()));
        }

        self.unload_locked(package_name).await;
        Ok(())
    }

    /// Registry first, then the loader scope. Never fails: loader errors are logged.
    async fn unload_locked(&self, package_name: &str) -> Option<ManagedExtension> {
        self.set_state(package_name, ExtensionState::Unloading);

        let removed = self.registry.remove_package(package_name);
        let extension = self.extensions.write().await.remove(package_name);

        if let Err(e) = self.loader.unload_extension(package_name).await {
            tracing::warn!(package = %package_name, error = %e, "Loader failed to unload extension");
        }

        self.set_state(package_name, ExtensionState::Unloaded);
        tracing::info!(package = %package_name, sources = removed.len(), "Extension unloaded");
        extension
    }

    /// Re-register the catalogue sources of every loaded extension
    ///
    /// Idempotent. Sources that previously lost an id collision are retried, so a
    /// conflict clears once the other package is gone.
    pub async fn refresh_sources(&self) -> usize {
        let mut packages: Vec<String> = self.extensions.read().await.keys().cloned().collect();
        packages.sort();

        let mut registered = 0;
        for package in packages {
            let _guard = self.lock_package(&package).await;
            let mut extensions = self.extensions.write().await;
            let Some(extension) = extensions.get_mut(&package) else {
                continue;
            };

            let live: Vec<SourceHandle> = Self::catalogue_sources(&extension.loaded);
            let registration = self.registry.register_all(&package, &live);
            registered += registration.registered.len();

            extension.info.source_ids = registration.registered;
            extension.info.conflicting_source_ids = registration.conflicts;
        }

        tracing::debug!(sources = registered, "Refreshed sources");
        registered
    }

    /// Unload every extension. Errors are logged, never returned.
    pub async fn shutdown(&self) {
        let packages: Vec<String> = self.extensions.read().await.keys().cloned().collect();
        tracing::info!(extensions = packages.len(), "Shutting down extension manager");

        for package in packages {
            let _guard = self.lock_package(&package).await;
            self.unload_locked(&package).await;
        }
    }

    // ------------------------------------------------------------------
    // Repositories
    // ------------------------------------------------------------------

    /// Listings of every enabled repository; a failing repository is logged and skipped
    pub async fn fetch_available_extensions(&self) -> Vec<ExtensionListing> {
        repository::fetch_all(self.http.as_ref(), &self.repositories.enabled()).await
    }

    /// Download a listing's APK into the extensions dir and load it
    pub async fn install_extension(
        &self,
        listing: &ExtensionListing,
        progress: &(dyn Fn(f32) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<ExtensionInfo> {
        let file_name = Path::new(&listing.file_name);
        if file_name.components().count() != 1 || file_name.file_name().is_none() {
            return Err(BridgeError::Repository(format!(
                "Refusing unsafe APK file name: {}",
                listing.file_name
            )));
        }

        tokio::fs::create_dir_all(&self.extensions_dir).await?;
        let target = self.extensions_dir.join(file_name);
        let partial = ScratchFile::new(self.extensions_dir.join(format!("{}.part", listing.file_name)));
        let url = listing.download_url();

        tracing::info!(
            package = %listing.package_name,
            version = %listing.version_name,
            url = %url,
            "Installing extension"
        );
        progress(0.0);

        let bytes = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(BridgeError::Cancelled(format!("Install of {} cancelled", listing.package_name)));
            }
            result = self.http.download(&url) => result?,
        };

        tokio::fs::write(partial.path(), &bytes).await?;
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled(format!("Install of {} cancelled", listing.package_name)));
        }

        // A failed load puts back the archive the running version was loaded from
        let previous = FileBackup::create(&target)?;
        tokio::fs::rename(partial.path(), &target).await?;
        partial.keep();
        progress(1.0);

        let info = self.load_extension(&target).await?;
        if let Err(e) = previous.commit() {
            tracing::warn!(package = %listing.package_name, error = %e, "Failed to delete replaced archive");
        }
        Ok(info)
    }

    /// Unload a package and delete its archive if it lives in the extensions dir
    pub async fn uninstall_extension(&self, package_name: &str) -> Result<()> {
        let _guard = self.lock_package(package_name).await;
        let Some(extension) = self.extensions.read().await.get(package_name).map(|e| e.info.clone()) else {
            return Err(BridgeError::ExtensionNotLoaded(package_name.to_string()));
        };

        self.unload_locked(package_name).await;

        let owned = [Some(&extension.apk_path), extension.icon_path.as_ref()];
        for path in owned.into_iter().flatten() {
            if path.starts_with(&self.extensions_dir) {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(package = %package_name, path = %path.display(), error = %e, "Failed to delete file");
                }
            }
        }

        tracing::info!(package = %package_name, "Extension uninstalled");
        Ok(())
    }

    /// Load every APK already present in the extensions dir
    pub async fn discover_installed(&self) -> Result<Vec<ExtensionInfo>> {
        tokio::fs::create_dir_all(&self.extensions_dir).await?;

        let mut apks: Vec<PathBuf> = WalkDir::new(&self.extensions_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "apk"))
            .collect();
        apks.sort();

        let mut loaded = Vec::new();
        for apk in apks {
            match self.load_extension(&apk).await {
                Ok(info) => loaded.push(info),
                Err(e) => tracing::warn!(apk = %apk.display(), error = %e, "Skipping installed extension"),
            }
        }

        tracing::info!(extensions = loaded.len(), dir = %self.extensions_dir.display(), "Discovered extensions");
        Ok(loaded)
    }

    /// Loaded packages whose repository listing has a strictly greater version code
    pub async fn check_for_updates(&self) -> Vec<ExtensionUpdate> {
        let available = self.fetch_available_extensions().await;
        let remote: HashMap<&str, &ExtensionListing> = available
            .iter()
            .fold(HashMap::new(), |mut best, listing| {
                let slot = best.entry(listing.package_name.as_str()).or_insert(listing);
                if listing.version_code > slot.version_code {
                    *slot = listing;
                }
                best
            });

        let mut updates: Vec<ExtensionUpdate> = self
            .extensions
            .read()
            .await
            .values()
            .filter_map(|extension| {
                let installed = &extension.info;
                let listing = remote.get(installed.package_name.as_str())?;
                (listing.version_code > installed.version_code).then(|| ExtensionUpdate {
                    extension_id: installed.package_name.clone(),
                    current_version: installed.version_name.clone(),
                    new_version: listing.version_name.clone(),
                    new_version_code: listing.version_code,
                })
            })
            .collect();
        updates.sort_by(|a, b| a.extension_id.cmp(&b.extension_id));
        updates
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// All registered sources, in natural name order
    pub fn get_sources(&self) -> Vec<SourceHandle> {
        let mut sources = self.registry.all();
        sources.sort_by(|a, b| natord::compare_ignore_case(a.name(), b.name()).then(a.id().cmp(&b.id())));
        sources
    }

    pub fn get_source(&self, id: i64) -> Option<SourceHandle> {
        self.registry.get(id)
    }

    /// Case-insensitive match on the source name
    pub fn search_sources(&self, query: &str) -> Vec<SourceHandle> {
        let query = query.trim().to_lowercase();
        self.get_sources()
            .into_iter()
            .filter(|s| s.name().to_lowercase().contains(&query))
            .collect()
    }

    /// Distinct source languages, sorted
    pub fn get_available_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.registry.all().iter().map(|s| s.lang().to_string()).collect();
        langs.sort();
        langs.dedup();
        langs
    }

    pub fn get_sources_by_language(&self, lang: &str) -> Vec<SourceHandle> {
        self.get_sources().into_iter().filter(|s| s.lang() == lang).collect()
    }

    pub async fn installed_extensions(&self) -> Vec<ExtensionInfo> {
        let mut infos: Vec<ExtensionInfo> = self
            .extensions
            .read()
            .await
            .values()
            .map(|extension| extension.info.clone())
            .collect();
        infos.sort_by(|a, b| a.package_name.cmp(&b.package_name));
        infos
    }

    pub fn registry_snapshot(&self) -> Vec<RegistryRow> {
        self.registry.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CompatibilityConfig;
    use crate::core::preferences::{KeyValueStore, MemoryStore};
    use crate::extension::repository::RepositoryDescriptor;
    use crate::extension::runtime::{LoaderContext, Platform};
    use crate::extension::testing::{
        factory_class, fake_source, source_class, write_extension_apk, FakeConverter, FakeHost, FakeHttp,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const PKG_A: &str = "eu.kanade.tachiyomi.extension.en.alpha";
    const PKG_B: &str = "eu.kanade.tachiyomi.extension.all.beta";

    fn host() -> Arc<FakeHost> {
        FakeHost::new(|_| {
            vec![
                source_class("eu.kanade.tachiyomi.extension.en.alpha.Alpha", || {
                    fake_source(11, "Alpha", "en").build()
                }),
                factory_class(
                    "eu.kanade.tachiyomi.extension.all.beta.BetaFactory",
                    vec![(21, "Beta 10", "en"), (22, "Beta 2", "fr"), (23, "Beta 1", "de")],
                ),
            ]
        })
    }

    struct Fixture {
        dir: TempDir,
        host: Arc<FakeHost>,
        manager: LifecycleManager,
        kv: Arc<MemoryStore>,
    }

    fn fixture_with(http: FakeHttp, platform: Platform) -> Fixture {
        let dir = TempDir::new().unwrap();
        let host = host();
        let extensions_dir = dir.path().join("tachi-extensions");
        let loader = runtime::create_runtime_loader(
            platform,
            LoaderContext {
                host: host.clone(),
                converter: Arc::new(FakeConverter::default()),
                compatibility: CompatibilityConfig::default(),
                extensions_dir: extensions_dir.clone(),
            },
        );
        let kv = Arc::new(MemoryStore::new());
        let manager = LifecycleManager::new(loader, Arc::new(http), RepositoryStore::new(kv.clone()), extensions_dir);
        Fixture { dir, host, manager, kv }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeHttp::default(), Platform::Managed)
    }

    fn alpha_apk(dir: &Path, version: &str, code: i32) -> PathBuf {
        write_extension_apk(&dir.join("incoming"), PKG_A, version, code, ".Alpha")
    }

    fn beta_apk(dir: &Path) -> PathBuf {
        write_extension_apk(&dir.join("incoming"), PKG_B, "1.4.7", 7, ".BetaFactory")
    }

    #[tokio::test]
    async fn test_load_registers_sources() {
        let f = fixture();
        let info = f.manager.load_extension(&beta_apk(f.dir.path())).await.unwrap();

        assert_eq!(info.source_ids, vec![21, 22, 23]);
        assert_eq!(info.lang, "all");
        assert_eq!(f.manager.extension_state(PKG_B), ExtensionState::Registered);
        assert_eq!(f.manager.registry().len(), 3);
        assert!(f.manager.get_source(22).is_some());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_registry_untouched() {
        let f = fixture();
        f.manager.load_extension(&beta_apk(f.dir.path())).await.unwrap();
        let before = f.manager.registry_snapshot();

        let broken = write_extension_apk(&f.dir.path().join("incoming"), "eu.kanade.tachiyomi.extension.en.gone", "1.4.1", 1, ".Missing");
        let err = f.manager.load_extension(&broken).await.unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
        assert_eq!(f.manager.extension_state("eu.kanade.tachiyomi.extension.en.gone"), ExtensionState::Unloaded);
        assert_eq!(f.manager.registry_snapshot(), before);

        let old = alpha_apk(f.dir.path(), "1.2.1", 1);
        assert!(matches!(
            f.manager.load_extension(&old).await,
            Err(BridgeError::UnsupportedLibVersion { .. })
        ));
        assert_eq!(f.manager.registry_snapshot(), before);

        assert!(matches!(
            f.manager.load_extension(&f.dir.path().join("nope.apk")).await,
            Err(BridgeError::PackageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unload_then_load_restores_same_ids() {
        let f = fixture();
        let apk = beta_apk(f.dir.path());
        f.manager.load_extension(&apk).await.unwrap();
        let first: Vec<i64> = f.manager.registry_snapshot().iter().map(|r| r.id).collect();
        let stale = f.manager.get_source(21).unwrap();

        f.manager.unload_extension(PKG_B).await.unwrap();
        assert!(f.manager.registry().is_empty());
        assert_eq!(f.manager.extension_state(PKG_B), ExtensionState::Unloaded);
        assert!(matches!(
            stale.get_popular_manga(1).await,
            Err(BridgeError::ExtensionUnloaded(_))
        ));

        f.manager.load_extension(&apk).await.unwrap();
        let second: Vec<i64> = f.manager.registry_snapshot().iter().map(|r| r.id).collect();
        assert_eq!(first, second);
        assert!(!Arc::ptr_eq(&f.manager.get_source(21).unwrap(), &stale));
        assert_eq!(f.host.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_previous_version() {
        let f = fixture();
        f.manager.load_extension(&alpha_apk(f.dir.path(), "1.4.1", 1)).await.unwrap();
        let info = f.manager
            .load_extension(&alpha_apk(f.dir.path(), "1.4.2", 2))
            .await
            .unwrap();

        assert_eq!(info.version_code, 2);
        assert_eq!(f.host.open_count(), 2);
        assert_eq!(f.host.closed_count(), 1);
        assert_eq!(f.manager.installed_extensions().await.len(), 1);
        assert_eq!(f.manager.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_version() {
        let f = fixture();
        f.manager.load_extension(&alpha_apk(f.dir.path(), "1.4.1", 1)).await.unwrap();
        let before = f.manager.registry_snapshot();
        let live = f.manager.get_source(11).unwrap();

        let err = f.manager
            .load_extension(&alpha_apk(f.dir.path(), "1.6.1", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedLibVersion { .. }));
        assert_eq!(f.manager.registry_snapshot(), before);
        assert_eq!(f.manager.extension_state(PKG_A), ExtensionState::Registered);
        assert_eq!(f.manager.installed_extensions().await[0].version_code, 1);
        assert!(live.get_popular_manga(1).await.is_ok());

        // Entry class missing from the new archive: only the new scope is closed
        let broken = write_extension_apk(&f.dir.path().join("broken"), PKG_A, "1.4.2", 2, ".Missing");
        let err = f.manager.load_extension(&broken).await.unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
        assert_eq!(f.manager.registry_snapshot(), before);
        assert_eq!(f.manager.extension_state(PKG_A), ExtensionState::Registered);
        assert_eq!(f.host.open_count(), 2);
        assert_eq!(f.host.closed_count(), 1);
        assert!(Arc::ptr_eq(&f.manager.get_source(11).unwrap(), &live));
        assert!(live.get_popular_manga(1).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads() {
        let f = fixture();
        let alpha = alpha_apk(f.dir.path(), "1.4.1", 1);

        // Same package twice: serialized, the loser's scope is replaced
        let (first, second) = tokio::join!(f.manager.load_extension(&alpha), f.manager.load_extension(&alpha));
        first.unwrap();
        second.unwrap();
        assert_eq!(f.host.open_count() - f.host.closed_count(), 1);
        let ids: Vec<i64> = f.manager.registry_snapshot().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![11]);
        assert_eq!(f.manager.installed_extensions().await.len(), 1);
        f.manager.unload_extension(PKG_A).await.unwrap();

        // Different packages in parallel while readers query
        let beta = beta_apk(f.dir.path());
        let done = AtomicBool::new(false);
        let loads = async {
            let results = tokio::join!(f.manager.load_extension(&alpha), f.manager.load_extension(&beta));
            done.store(true, Ordering::SeqCst);
            results
        };
        let reader = async {
            let mut seen = Vec::new();
            while !done.load(Ordering::SeqCst) {
                seen.push(f.manager.get_sources().len());
                tokio::task::yield_now().await;
            }
            seen
        };
        let ((a, b), seen) = tokio::join!(loads, reader);
        a.unwrap();
        b.unwrap();

        // A package's sources appear all at once
        assert!(seen.iter().all(|n| [0, 1, 3, 4].contains(n)), "observed {:?}", seen);
        assert_eq!(f.manager.get_sources().len(), 4);
        assert_eq!(f.manager.extension_state(PKG_A), ExtensionState::Registered);
        assert_eq!(f.manager.extension_state(PKG_B), ExtensionState::Registered);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_and_clears_conflicts() {
        let f = fixture();
        f.manager.load_extension(&beta_apk(f.dir.path())).await.unwrap();

        // A second package claiming id 21 loses the collision
        let impostor_pkg = "eu.kanade.tachiyomi.extension.en.impostor";
        let host = FakeHost::new(|_| {
            vec![source_class("eu.kanade.tachiyomi.extension.en.impostor.Impostor", || {
                fake_source(21, "Impostor", "en").build()
            })]
        });
        let loader = runtime::create_runtime_loader(
            Platform::Managed,
            LoaderContext {
                host,
                converter: Arc::new(FakeConverter::default()),
                compatibility: CompatibilityConfig::default(),
                extensions_dir: f.dir.path().join("other"),
            },
        );
        let impostor = loader
            .load_extension(&write_extension_apk(&f.dir.path().join("incoming"), impostor_pkg, "1.4.1", 1, ".Impostor"))
            .await
            .unwrap();
        let info = f.manager.register(impostor).await;
        assert!(info.source_ids.is_empty());
        assert_eq!(info.conflicting_source_ids, vec![21]);
        assert_eq!(f.manager.get_source(21).unwrap().name(), "Beta 10");

        let snapshot = f.manager.registry_snapshot();
        f.manager.refresh_sources().await;
        assert_eq!(f.manager.registry_snapshot(), snapshot);
        f.manager.refresh_sources().await;
        assert_eq!(f.manager.registry_snapshot(), snapshot);

        // Owner leaves, refresh hands the id to the impostor
        f.manager.unload_extension(PKG_B).await.unwrap();
        f.manager.refresh_sources().await;
        assert_eq!(f.manager.get_source(21).unwrap().name(), "Impostor");
        let infos = f.manager.installed_extensions().await;
        assert_eq!(infos[0].source_ids, vec![21]);
        assert!(infos[0].conflicting_source_ids.is_empty());
    }

    #[tokio::test]
    async fn test_queries() {
        let f = fixture();
        f.manager.load_extension(&alpha_apk(f.dir.path(), "1.4.1", 1)).await.unwrap();
        f.manager.load_extension(&beta_apk(f.dir.path())).await.unwrap();

        let names: Vec<String> = f.manager.get_sources().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["Alpha", "Beta 1", "Beta 2", "Beta 10"]);
        assert_eq!(f.manager.get_available_languages(), vec!["de", "en", "fr"]);
        assert_eq!(f.manager.get_sources_by_language("en").len(), 2);
        assert_eq!(f.manager.search_sources("BETA").len(), 3);
        assert!(f.manager.search_sources("gamma").is_empty());
        assert_eq!(f.manager.installed_extensions().await[0].package_name, PKG_B);
    }

    fn index_json(entries: &[(&str, i64)]) -> String {
        let items: Vec<serde_json::Value> = entries
            .iter()
            .map(|(pkg, code)| {
                serde_json::json!({
                    "pkg": pkg,
                    "name": format!("Tachiyomi: {}", pkg),
                    "apk": format!("{}.apk", pkg),
                    "lang": "en",
                    "code": code,
                    "version": format!("1.4.{}", code),
                })
            })
            .collect();
        serde_json::Value::Array(items).to_string()
    }

    fn with_repos(f: &Fixture, urls: &[&str]) {
        let repos: Vec<RepositoryDescriptor> = urls
            .iter()
            .map(|url| RepositoryDescriptor::new(*url, *url).unwrap())
            .collect();
        f.kv.put_string("repositories", &serde_json::to_string(&repos).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_partial_repository_failure() {
        let mut http = FakeHttp::default();
        let a: Vec<String> = (0..10).map(|i| format!("pkg.a{}", i)).collect();
        let c: Vec<String> = (0..5).map(|i| format!("pkg.c{}", i)).collect();
        let entries = |pkgs: &[String]| index_json(&pkgs.iter().map(|p| (p.as_str(), 1)).collect::<Vec<_>>());
        http.pages.insert("https://a.example/index.min.json".to_string(), (200, entries(&a[..])));
        http.pages.insert("https://b.example/index.min.json".to_string(), (500, "oops".to_string()));
        http.pages.insert("https://c.example/index.min.json".to_string(), (200, entries(&c[..])));

        let f = fixture_with(http, Platform::Managed);
        with_repos(&f, &["https://a.example", "https://b.example", "https://c.example"]);

        assert_eq!(f.manager.fetch_available_extensions().await.len(), 15);
    }

    #[tokio::test]
    async fn test_check_for_updates_only_strictly_newer() {
        for (remote_code, expected) in [(5, 1usize), (3, 0), (2, 0)] {
            let mut http = FakeHttp::default();
            http.pages.insert(
                "https://repo.example/index.min.json".to_string(),
                (200, index_json(&[(PKG_A, remote_code)])),
            );
            let f = fixture_with(http, Platform::Managed);
            with_repos(&f, &["https://repo.example"]);
            f.manager.load_extension(&alpha_apk(f.dir.path(), "1.4.3", 3)).await.unwrap();

            let updates = f.manager.check_for_updates().await;
            assert_eq!(updates.len(), expected, "remote code {}", remote_code);
            if expected == 1 {
                assert_eq!(updates[0].new_version_code, 5);
                assert_eq!(updates[0].current_version, "1.4.3");
                assert_eq!(updates[0].extension_id, PKG_A);
            }
        }
    }

    fn listing(file_name: &str) -> ExtensionListing {
        ExtensionListing {
            package_name: PKG_A.to_string(),
            name: "Alpha".to_string(),
            version_name: "1.4.3".to_string(),
            version_code: 3,
            lang: "en".to_string(),
            is_nsfw: false,
            file_name: file_name.to_string(),
            icon_url: "https://repo.example/icon/alpha.png".to_string(),
            repo_url: "https://repo.example".to_string(),
            source_count: 1,
        }
    }

    #[tokio::test]
    async fn test_install_and_uninstall() {
        let staging = TempDir::new().unwrap();
        let apk = alpha_apk(staging.path(), "1.4.3", 3);
        let mut http = FakeHttp::default();
        http.files.insert(
            "https://repo.example/apk/alpha.apk".to_string(),
            std::fs::read(&apk).unwrap(),
        );
        let f = fixture_with(http, Platform::Desktop);

        let reported = Mutex::new(Vec::new());
        let info = f.manager
            .install_extension(
                &listing("alpha.apk"),
                &|p: f32| reported.lock().unwrap().push(p),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let installed = f.manager.extensions_dir().join("alpha.apk");
        assert_eq!(*reported.lock().unwrap(), vec![0.0, 1.0]);
        assert_eq!(info.apk_path, installed);
        assert!(installed.exists());
        assert!(!f.manager.extensions_dir().join("alpha.apk.part").exists());

        f.manager.uninstall_extension(PKG_A).await.unwrap();
        assert!(!installed.exists());
        assert!(f.manager.registry().is_empty());
        assert!(matches!(
            f.manager.uninstall_extension(PKG_A).await,
            Err(BridgeError::ExtensionNotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_update_restores_installed_archive() {
        let staging = TempDir::new().unwrap();
        let current = std::fs::read(alpha_apk(staging.path(), "1.4.3", 3)).unwrap();
        let unsupported = std::fs::read(alpha_apk(&staging.path().join("next"), "1.6.1", 4)).unwrap();
        let mut http = FakeHttp::default();
        http.files.insert("https://repo.example/apk/alpha.apk".to_string(), current.clone());
        http.files.insert("https://other.example/apk/alpha.apk".to_string(), unsupported);
        let f = fixture_with(http, Platform::Managed);

        f.manager
            .install_extension(&listing("alpha.apk"), &|_: f32| {}, &CancellationToken::new())
            .await
            .unwrap();
        let before = f.manager.registry_snapshot();

        let mut update = listing("alpha.apk");
        update.repo_url = "https://other.example".to_string();
        update.version_code = 4;
        let err = f.manager
            .install_extension(&update, &|_: f32| {}, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::UnsupportedLibVersion { .. }));
        let installed = f.manager.extensions_dir().join("alpha.apk");
        assert_eq!(std::fs::read(&installed).unwrap(), current);
        assert!(!f.manager.extensions_dir().join("alpha.apk.backup").exists());
        assert!(!f.manager.extensions_dir().join("alpha.apk.part").exists());
        assert_eq!(f.manager.registry_snapshot(), before);
        assert_eq!(f.manager.extension_state(PKG_A), ExtensionState::Registered);
        assert!(f.manager.get_source(11).unwrap().get_popular_manga(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_install_leaves_nothing() {
        let http = FakeHttp {
            hang_downloads: true,
            ..Default::default()
        };
        let f = fixture_with(http, Platform::Managed);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f.manager
            .install_extension(&listing("alpha.apk"), &|_: f32| {}, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Cancelled(_)));
        assert_eq!(f.manager.extension_state(PKG_A), ExtensionState::Unloaded);
        let leftovers = std::fs::read_dir(f.manager.extensions_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_download_and_unsafe_names() {
        let f = fixture();
        assert!(matches!(
            f.manager
                .install_extension(&listing("alpha.apk"), &|_: f32| {}, &CancellationToken::new())
                .await,
            Err(BridgeError::Network(_))
        ));
        assert!(!f.manager.extensions_dir().join("alpha.apk.part").exists());

        assert!(matches!(
            f.manager
                .install_extension(&listing("../escape.apk"), &|_: f32| {}, &CancellationToken::new())
                .await,
            Err(BridgeError::Repository(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_and_shutdown() {
        let f = fixture();
        let dir = f.manager.extensions_dir().to_path_buf();
        write_extension_apk(&dir, PKG_A, "1.4.1", 1, ".Alpha");
        write_extension_apk(&dir, PKG_B, "1.4.7", 7, ".BetaFactory");
        std::fs::write(dir.join("garbage.apk"), b"not a zip").unwrap();
        std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let discovered = f.manager.discover_installed().await.unwrap();
        assert_eq!(discovered.len(), 2);
        assert_eq!(f.manager.registry().len(), 4);

        f.manager.shutdown().await;
        assert!(f.manager.registry().is_empty());
        assert!(f.manager.installed_extensions().await.is_empty());
        assert_eq!(f.host.closed_count(), 2);
    }
}
