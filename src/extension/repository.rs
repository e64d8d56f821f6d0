//! Extension repositories
//!
//! A repository is a static site serving `index.min.json` plus `apk/` and `icon/`
//! directories. The configured list is persisted in the key-value store as a JSON
//! array under `repositories`.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::error::{BridgeError, Result};
use crate::core::http::HttpClient;
use crate::core::preferences::KeyValueStore;

const REPOSITORIES_KEY: &str = "repositories";
const INDEX_FILE: &str = "index.min.json";
const LABEL_PREFIX: &str = "Tachiyomi: ";

pub const KEIYOUSHI_NAME: &str = "Keiyoushi";
pub const KEIYOUSHI_URL: &str = "https://raw.githubusercontent.com/keiyoushi/extensions/repo";

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDescriptor {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_enabled", rename = "isEnabled")]
    pub enabled: bool,
}

impl RepositoryDescriptor {
    pub fn new(name: impl Into<String>, base_url: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            base_url: normalize_base_url(base_url)?,
            enabled: true,
        })
    }

    pub fn keiyoushi() -> Self {
        Self {
            name: KEIYOUSHI_NAME.to_string(),
            base_url: KEIYOUSHI_URL.to_string(),
            enabled: true,
        }
    }

    pub fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, INDEX_FILE)
    }
}

/// Canonical form of a repository URL: http(s), no trailing slash, no index file
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let mut url = raw.trim().trim_end_matches('/').to_string();
    if let Some(stripped) = url.strip_suffix(INDEX_FILE) {
        url = stripped.trim_end_matches('/').to_string();
    }

    let parsed = Url::parse(&url).map_err(|e| BridgeError::Repository(format!("Invalid repository URL {}: {}", raw, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BridgeError::Repository(format!(
            "Unsupported repository scheme: {}",
            parsed.scheme()
        )));
    }

    Ok(url)
}

/// An extension offered by a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionListing {
    pub package_name: String,
    pub name: String,
    pub version_name: String,
    pub version_code: i64,
    pub lang: String,
    pub is_nsfw: bool,
    pub file_name: String,
    pub icon_url: String,
    pub repo_url: String,
    pub source_count: u32,
}

impl ExtensionListing {
    pub fn download_url(&self) -> String {
        format!("{}/apk/{}", self.repo_url, urlencoding::encode(&self.file_name))
    }
}

/// A loaded package with a strictly newer remote version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionUpdate {
    pub extension_id: String,
    pub current_version: String,
    pub new_version: String,
    pub new_version_code: i64,
}

fn string_field<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}

fn int_field(entry: &Value, key: &str) -> Option<i64> {
    match entry.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a repository index, skipping entries without `pkg`, `name` or `apk`
pub fn parse_index(body: &str, repo_url: &str) -> Result<Vec<ExtensionListing>> {
    let document: Value = serde_json::from_str(body)
        .map_err(|e| BridgeError::Repository(format!("Failed to parse repo index: {}", e)))?;
    let entries = document
        .as_array()
        .ok_or_else(|| BridgeError::Repository("Repo index is not a JSON array".to_string()))?;

    let mut listings = Vec::with_capacity(entries.len());
    for entry in entries {
        let (Some(pkg), Some(name), Some(apk)) = (
            string_field(entry, "pkg"),
            string_field(entry, "name"),
            string_field(entry, "apk"),
        ) else {
            tracing::debug!(repo = %repo_url, "Skipping incomplete index entry");
            continue;
        };

        let is_nsfw = match entry.get("nsfw") {
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::String(s)) => s == "1",
            _ => false,
        };
        let source_count = match entry.get("sources") {
            Some(Value::Array(sources)) => sources.len() as u32,
            Some(Value::Number(n)) => n.as_u64().map(|n| n as u32).unwrap_or(1),
            _ => 1,
        };

        listings.push(ExtensionListing {
            package_name: pkg.to_string(),
            name: name.strip_prefix(LABEL_PREFIX).unwrap_or(name).to_string(),
            version_name: string_field(entry, "version").unwrap_or("1.0").to_string(),
            version_code: int_field(entry, "code").unwrap_or(0),
            lang: string_field(entry, "lang").unwrap_or("all").to_string(),
            is_nsfw,
            file_name: apk.to_string(),
            icon_url: format!("{}/icon/{}.png", repo_url, pkg),
            repo_url: repo_url.to_string(),
            source_count,
        });
    }

    Ok(listings)
}

/// Fetch and parse one repository's index
pub async fn fetch_index(http: &dyn HttpClient, repo: &RepositoryDescriptor) -> Result<Vec<ExtensionListing>> {
    let response = http.get(&repo.index_url()).await?;
    if !response.is_success() {
        return Err(BridgeError::Repository(format!(
            "Failed to fetch repo index {}: HTTP {}",
            repo.base_url, response.status
        )));
    }
    if response.body.trim().is_empty() {
        return Err(BridgeError::Repository(format!("Empty repo index from {}", repo.base_url)));
    }

    parse_index(&response.body, &repo.base_url)
}

/// Listings of every repository in `repos`, fetched concurrently
///
/// A repository that fails is logged and skipped; the rest still contribute.
pub async fn fetch_all(http: &dyn HttpClient, repos: &[RepositoryDescriptor]) -> Vec<ExtensionListing> {
    let results = join_all(repos.iter().map(|repo| fetch_index(http, repo))).await;

    let mut listings = Vec::new();
    for (repo, result) in repos.iter().zip(results) {
        match result {
            Ok(mut entries) => {
                tracing::debug!(repo = %repo.base_url, extensions = entries.len(), "Fetched repository index");
                listings.append(&mut entries);
            }
            Err(e) => {
                tracing::warn!(repo = %repo.base_url, error = %e, "Failed to fetch repository index");
            }
        }
    }
    listings
}

/// Repository list persisted in the key-value store
#[derive(Clone)]
pub struct RepositoryStore {
    store: Arc<dyn KeyValueStore>,
}

impl RepositoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Configured repositories; the Keiyoushi repository when nothing is stored
    pub fn list(&self) -> Vec<RepositoryDescriptor> {
        let Some(raw) = self.store.get_string(REPOSITORIES_KEY) else {
            return vec![RepositoryDescriptor::keiyoushi()];
        };

        match serde_json::from_str(&raw) {
            Ok(repos) => repos,
            Err(e) => {
                tracing::warn!(error = %e, "Stored repository list is corrupt, using defaults");
                vec![RepositoryDescriptor::keiyoushi()]
            }
        }
    }

    pub fn enabled(&self) -> Vec<RepositoryDescriptor> {
        self.list().into_iter().filter(|r| r.enabled).collect()
    }

    fn save(&self, repos: &[RepositoryDescriptor]) -> Result<()> {
        let raw = serde_json::to_string(repos)?;
        self.store.put_string(REPOSITORIES_KEY, &raw)
    }

    /// Add a repository; returns `false` when its URL is already configured
    pub fn add(&self, repo: RepositoryDescriptor) -> Result<bool> {
        let mut repos = self.list();
        if repos.iter().any(|r| r.base_url == repo.base_url) {
            return Ok(false);
        }

        tracing::info!(repo = %repo.base_url, name = %repo.name, "Adding repository");
        repos.push(repo);
        self.save(&repos)?;
        Ok(true)
    }

    pub fn remove(&self, base_url: &str) -> Result<bool> {
        let base_url = normalize_base_url(base_url)?;
        let mut repos = self.list();
        let before = repos.len();
        repos.retain(|r| r.base_url != base_url);

        if repos.len() == before {
            return Ok(false);
        }
        tracing::info!(repo = %base_url, "Removing repository");
        self.save(&repos)?;
        Ok(true)
    }

    pub fn set_enabled(&self, base_url: &str, enabled: bool) -> Result<bool> {
        let base_url = normalize_base_url(base_url)?;
        let mut repos = self.list();
        let Some(repo) = repos.iter_mut().find(|r| r.base_url == base_url) else {
            return Ok(false);
        };

        repo.enabled = enabled;
        self.save(&repos)?;
        Ok(true)
    }
}
