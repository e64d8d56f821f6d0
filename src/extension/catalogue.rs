//! Host-side catalogue contract
//!
//! [`CatalogueSource`] is the stable surface browse, search and update flows consume.
//! The models below are plain host values; they never reference foreign objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// Chapter number meaning "unknown or unordered"
pub const UNKNOWN_CHAPTER_NUMBER: f32 = -1.0;

pub mod manga_status {
    pub const UNKNOWN: i32 = 0;
    pub const ONGOING: i32 = 1;
    pub const COMPLETED: i32 = 2;
    pub const LICENSED: i32 = 3;
    pub const PUBLISHING_FINISHED: i32 = 4;
    pub const CANCELLED: i32 = 5;
    pub const ON_HIATUS: i32 = 6;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manga {
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub status: i32,
    pub thumbnail_url: Option<String>,
    pub initialized: bool,
}

impl Manga {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Comma separated genres, trimmed
    pub fn genres(&self) -> Vec<String> {
        self.genre
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub url: String,
    pub name: String,
    /// Milliseconds since the epoch, 0 when unknown
    pub date_upload: i64,
    /// [`UNKNOWN_CHAPTER_NUMBER`] when the source gave none; `0.0` is a real chapter zero
    pub chapter_number: f32,
    pub scanlator: Option<String>,
}

impl Default for Chapter {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: String::new(),
            date_upload: 0,
            chapter_number: UNKNOWN_CHAPTER_NUMBER,
            scanlator: None,
        }
    }
}

impl Chapter {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_numbered(&self) -> bool {
        self.chapter_number >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub index: i32,
    pub url: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MangasPage {
    pub mangas: Vec<Manga>,
    pub has_next_page: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSelection {
    pub index: i32,
    pub ascending: bool,
}

/// A search filter and its current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    Header { name: String },
    Separator { name: String },
    Text { name: String, state: String },
    CheckBox { name: String, state: bool },
    /// 0 ignore, 1 include, 2 exclude
    TriState { name: String, state: i32 },
    Select { name: String, values: Vec<String>, state: i32 },
    Sort { name: String, values: Vec<String>, state: Option<SortSelection> },
    Group { name: String, filters: Vec<Filter> },
}

impl Filter {
    pub fn name(&self) -> &str {
        match self {
            Filter::Header { name }
            | Filter::Separator { name }
            | Filter::Text { name, .. }
            | Filter::CheckBox { name, .. }
            | Filter::TriState { name, .. }
            | Filter::Select { name, .. }
            | Filter::Sort { name, .. }
            | Filter::Group { name, .. } => name,
        }
    }

    /// Headers and separators carry no state
    pub fn is_stateful(&self) -> bool {
        !matches!(self, Filter::Header { .. } | Filter::Separator { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterList {
    pub filters: Vec<Filter>,
}

impl FilterList {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name() == name)
    }
}

/// Stable capability set every loaded source is exposed through
///
/// Identity accessors and `get_filter_list` are synchronous and cheap. Every other
/// capability may perform network I/O inside the extension and runs off the caller's
/// task.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    fn id(&self) -> i64;

    fn name(&self) -> &str;

    fn lang(&self) -> &str;

    fn supports_latest(&self) -> bool;

    async fn get_popular_manga(&self, page: i32) -> Result<MangasPage>;

    async fn get_search_manga(&self, page: i32, query: &str, filters: &FilterList) -> Result<MangasPage>;

    async fn get_latest_updates(&self, page: i32) -> Result<MangasPage>;

    async fn get_manga_details(&self, manga: &Manga) -> Result<Manga>;

    async fn get_chapter_list(&self, manga: &Manga) -> Result<Vec<Chapter>>;

    async fn get_page_list(&self, chapter: &Chapter) -> Result<Vec<Page>>;

    fn get_filter_list(&self) -> Result<FilterList>;
}
