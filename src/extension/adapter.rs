//! Structural source adapter
//!
//! Wraps a foreign source object of unknown static type and exposes it as a
//! [`CatalogueSource`]. Members are located by name on first use and cached per
//! instance. A missing accessor degrades to a default; a missing method fails the call
//! with `CapabilityUnavailable` and leaves the decision to the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;

use super::catalogue::{CatalogueSource, Chapter, FilterList, Manga, MangasPage, Page};
use super::convert;
use super::foreign::{ForeignError, ForeignObject, ForeignRef, ForeignValue, LoaderScope, MemberKind};
use crate::core::error::{BridgeError, Result};

/// Shared handle to a registered source
pub type SourceHandle = Arc<SourceAdapter>;

const UNKNOWN_NAME: &str = "Unknown";

/// Member table of one foreign instance: name -> kinds (overloads keep every arity)
type MemberTable = HashMap<String, Vec<MemberKind>>;

/// How a capability resolved on the foreign object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Method,
    Field,
    Missing,
}

#[derive(Debug, Clone)]
struct Identity {
    id: i64,
    name: String,
    lang: String,
    supports_latest: bool,
    base_url: Option<String>,
}

pub struct SourceAdapter {
    package_name: String,
    foreign: ForeignRef,
    scope: Weak<dyn LoaderScope>,
    members: OnceLock<MemberTable>,
    identity: Identity,
}

impl SourceAdapter {
    /// Wrap `foreign`, reading and caching its identity
    pub fn new(package_name: impl Into<String>, foreign: ForeignRef, scope: Weak<dyn LoaderScope>) -> Self {
        let mut adapter = Self {
            package_name: package_name.into(),
            foreign,
            scope,
            members: OnceLock::new(),
            identity: Identity {
                id: 0,
                name: UNKNOWN_NAME.to_string(),
                lang: String::new(),
                supports_latest: false,
                base_url: None,
            },
        };
        adapter.identity = adapter.read_identity();
        adapter
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn foreign(&self) -> &ForeignRef {
        &self.foreign
    }

    pub fn base_url(&self) -> Option<&str> {
        self.identity.base_url.as_deref()
    }

    /// Whether the wrapped object can serve catalogue browsing
    ///
    /// Checked structurally: either it implements an interface named `CatalogueSource`,
    /// or it exposes `getPopularManga`.
    pub fn is_catalogue_source(&self) -> bool {
        let implements = self
            .foreign
            .interfaces()
            .iter()
            .any(|iface| iface.rsplit(['.', '$']).next() == Some("CatalogueSource"));
        implements || self.has_capability("getPopularManga", 1)
    }

    /// Whether the foreign object declares a method `name` taking `arity` arguments
    pub fn has_capability(&self, name: &str, arity: usize) -> bool {
        self.resolve(name, Some(arity)) == Binding::Method
    }

    fn member_table(&self) -> &MemberTable {
        self.members.get_or_init(|| {
            let mut table = MemberTable::new();
            for member in self.foreign.members() {
                table.entry(member.name).or_default().push(member.kind);
            }
            table
        })
    }

    /// Exact arity first, then any overload of the same name
    fn resolve(&self, name: &str, arity: Option<usize>) -> Binding {
        let Some(kinds) = self.member_table().get(name) else {
            return Binding::Missing;
        };

        let exact = arity.is_some_and(|n| kinds.contains(&MemberKind::Method { arity: n }));
        if exact || kinds.iter().any(|k| matches!(k, MemberKind::Method { .. })) {
            Binding::Method
        } else if kinds.contains(&MemberKind::Field) {
            Binding::Field
        } else {
            Binding::Missing
        }
    }

    /// Tolerant property read: getter, then field, else `None`
    fn property(&self, name: &str) -> Option<ForeignValue> {
        let getter = format!("get{}", convert::capitalize(name));
        let result = match self.resolve(&getter, Some(0)) {
            Binding::Method => self.foreign.invoke(&getter, &[]),
            _ if self.resolve(name, None) == Binding::Field => self.foreign.get_field(name),
            _ => return None,
        };

        match result {
            Ok(ForeignValue::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(
                    package = %self.package_name,
                    property = name,
                    error = %e,
                    "Property read failed, using default"
                );
                None
            }
        }
    }

    fn read_identity(&self) -> Identity {
        let string = |name: &str| self.property(name).and_then(|v| v.as_str().map(str::to_string));

        Identity {
            id: self.property("id").and_then(|v| v.as_i64()).unwrap_or(0),
            name: string("name").unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            lang: string("lang").unwrap_or_default(),
            supports_latest: self
                .property("supportsLatest")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            base_url: string("baseUrl"),
        }
    }

    /// Strict lookup: the method must exist
    fn require(&self, method: &str, arity: usize) -> Result<()> {
        match self.resolve(method, Some(arity)) {
            Binding::Method => Ok(()),
            _ => Err(BridgeError::capability_unavailable(method)),
        }
    }

    fn live_scope(&self) -> Result<Arc<dyn LoaderScope>> {
        self.scope
            .upgrade()
            .ok_or_else(|| BridgeError::ExtensionUnloaded(self.package_name.clone()))
    }

    fn invocation_error(&self, method: &str, error: ForeignError) -> BridgeError {
        match error {
            ForeignError::ScopeClosed => BridgeError::ExtensionUnloaded(self.package_name.clone()),
            other => BridgeError::invocation(method, other),
        }
    }

    /// Run a foreign call on the blocking pool
    async fn call<T, F>(&self, method: &'static str, arity: usize, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ForeignObject, &dyn LoaderScope) -> std::result::Result<T, ForeignError> + Send + 'static,
    {
        let scope = self.live_scope()?;
        self.require(method, arity)?;

        tracing::debug!(
            package = %self.package_name,
            source_id = self.identity.id,
            method,
            "Invoking source capability"
        );

        let foreign = self.foreign.clone();
        let result = tokio::task::spawn_blocking(move || f(foreign.as_ref(), scope.as_ref()))
            .await
            .map_err(|e| BridgeError::invocation(method, format!("Task join error: {}", e)))?;

        result.map_err(|e| {
            let error = self.invocation_error(method, e);
            tracing::warn!(
                package = %self.package_name,
                source_id = self.identity.id,
                method,
                error = %error,
                "Source capability failed"
            );
            error
        })
    }

    fn source_filters(&self, scope: &dyn LoaderScope) -> std::result::Result<ForeignValue, ForeignError> {
        if self.resolve("getFilterList", Some(0)) == Binding::Method {
            self.foreign.invoke("getFilterList", &[])
        } else {
            convert::empty_filter_list(scope).map(ForeignValue::Object)
        }
    }
}

#[async_trait]
impl CatalogueSource for SourceAdapter {
    fn id(&self) -> i64 {
        self.identity.id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    fn lang(&self) -> &str {
        &self.identity.lang
    }

    fn supports_latest(&self) -> bool {
        self.identity.supports_latest
    }

    async fn get_popular_manga(&self, page: i32) -> Result<MangasPage> {
        self.call("getPopularManga", 1, move |source, _| {
            let result = source.invoke("getPopularManga", &[ForeignValue::Int(page)])?;
            Ok(convert::mangas_page_from_foreign(&result))
        })
        .await
    }

    async fn get_search_manga(&self, page: i32, query: &str, filters: &FilterList) -> Result<MangasPage> {
        let scope = self.live_scope()?;
        self.require("getSearchManga", 3)?;

        // Filter objects are built on the caller's side; getFilterList is non-blocking
        let foreign_filters = self
            .source_filters(scope.as_ref())
            .map_err(|e| self.invocation_error("getSearchManga", e))?;
        let applied = convert::apply_filter_state(scope.as_ref(), &foreign_filters, &filters.filters);
        tracing::debug!(package = %self.package_name, applied, "Applied filter state");

        let query = query.to_string();
        self.call("getSearchManga", 3, move |source, _| {
            let result = source.invoke(
                "getSearchManga",
                &[ForeignValue::Int(page), ForeignValue::Str(query), foreign_filters],
            )?;
            Ok(convert::mangas_page_from_foreign(&result))
        })
        .await
    }

    async fn get_latest_updates(&self, page: i32) -> Result<MangasPage> {
        self.call("getLatestUpdates", 1, move |source, _| {
            let result = source.invoke("getLatestUpdates", &[ForeignValue::Int(page)])?;
            Ok(convert::mangas_page_from_foreign(&result))
        })
        .await
    }

    async fn get_manga_details(&self, manga: &Manga) -> Result<Manga> {
        let manga = manga.clone();
        self.call("getMangaDetails", 1, move |source, scope| {
            let arg = convert::manga_to_foreign(scope, &manga)?;
            let result = source.invoke("getMangaDetails", &[ForeignValue::Object(arg)])?;
            Ok(convert::manga_from_foreign(&result))
        })
        .await
    }

    async fn get_chapter_list(&self, manga: &Manga) -> Result<Vec<Chapter>> {
        let manga = manga.clone();
        self.call("getChapterList", 1, move |source, scope| {
            let arg = convert::manga_to_foreign(scope, &manga)?;
            let result = source.invoke("getChapterList", &[ForeignValue::Object(arg)])?;
            Ok(convert::chapters_from_foreign(&result))
        })
        .await
    }

    async fn get_page_list(&self, chapter: &Chapter) -> Result<Vec<Page>> {
        let chapter = chapter.clone();
        self.call("getPageList", 1, move |source, scope| {
            let arg = convert::chapter_to_foreign(scope, &chapter)?;
            let result = source.invoke("getPageList", &[ForeignValue::Object(arg)])?;
            Ok(convert::pages_from_foreign(&result))
        })
        .await
    }

    fn get_filter_list(&self) -> Result<FilterList> {
        self.live_scope()?;
        self.require("getFilterList", 0)?;

        let result = self
            .foreign
            .invoke("getFilterList", &[])
            .map_err(|e| self.invocation_error("getFilterList", e))?;
        Ok(convert::filter_list_from_foreign(&result))
    }
}

impl fmt::Debug for SourceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceAdapter")
            .field("package_name", &self.package_name)
            .field("id", &self.identity.id)
            .field("name", &self.identity.name)
            .field("lang", &self.identity.lang)
            .finish()
    }
}
