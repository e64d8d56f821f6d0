//! Package identity extraction
//!
//! The binary manifest is authoritative. When it cannot be decoded the extractor falls
//! back to the conventional file name `<prefix>-<lang>-<name>-v<version>` and flags the
//! result with `is_heuristic`; such metadata is a best guess and callers should treat
//! it that way.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use super::archive;
use super::manifest::{self, ManifestInfo};
use super::types::ExtensionMetadata;
use crate::core::error::{BridgeError, Result};

const LABEL_PREFIX: &str = "Tachiyomi: ";
const EXTENSION_PACKAGE_PREFIX: &str = "eu.kanade.tachiyomi.extension";

lazy_static! {
    static ref FILE_NAME_PATTERN: Regex =
        Regex::new(r"^[^-]+-([^-]+)-(.+?)(?:-v([0-9][0-9A-Za-z.]*))?$").unwrap();
    static ref TRAILING_NUMBER: Regex = Regex::new(r"(\d+)\D*$").unwrap();
}

/// Lib version of an extension: the `versionName` minus its last component
///
/// `1.4.12` declares lib `1.4`. Anything unparsable yields `0.0`, which no host supports.
pub fn lib_version(version_name: &str) -> f64 {
    if let Ok(version) = semver::Version::parse(version_name.trim()) {
        return format!("{}.{}", version.major, version.minor).parse().unwrap_or(0.0);
    }

    let lib = match version_name.rfind('.') {
        Some(idx) => &version_name[..idx],
        None => version_name,
    };
    lib.trim().parse::<f64>().unwrap_or(0.0)
}

/// Strip the label prefix every extension carries
pub fn display_name_from_label(label: &str) -> String {
    label.strip_prefix(LABEL_PREFIX).unwrap_or(label).trim().to_string()
}

/// Language segment of `eu.kanade.tachiyomi.extension.<lang>.<name>`
pub fn lang_from_package(package: &str) -> String {
    package
        .strip_prefix(EXTENSION_PACKAGE_PREFIX)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.split('.').next())
        .filter(|lang| !lang.is_empty())
        .unwrap_or("all")
        .to_string()
}

fn name_from_package(package: &str) -> String {
    package.rsplit('.').next().unwrap_or(package).to_string()
}

/// Read identity from the APK, preferring its manifest
pub fn extract(apk_path: &Path) -> Result<ExtensionMetadata> {
    let mut archive = archive::open(apk_path)?;

    if !archive::has_entry(&archive, archive::MANIFEST_ENTRY) {
        return Err(BridgeError::Validation("No AndroidManifest.xml found".to_string()));
    }
    let manifest_bytes = archive::read_entry(&mut archive, archive::MANIFEST_ENTRY)?;

    match manifest::decode(&manifest_bytes) {
        Ok(document) => from_manifest(&ManifestInfo::from_document(&document)?),
        Err(e) => {
            tracing::debug!(
                apk = %apk_path.display(),
                error = %e,
                "Manifest not decodable, deriving metadata from file name"
            );
            from_file_name(apk_path)
        }
    }
}

pub fn from_manifest(info: &ManifestInfo) -> Result<ExtensionMetadata> {
    let display_name = info
        .label
        .as_deref()
        .map(display_name_from_label)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| name_from_package(&info.package));

    if display_name.is_empty() {
        return Err(BridgeError::Manifest(format!(
            "{} declares no display name",
            info.package
        )));
    }

    Ok(ExtensionMetadata {
        package_name: info.package.clone(),
        display_name,
        version_name: info.version_name.clone(),
        version_code: info.version_code,
        lang: lang_from_package(&info.package),
        is_nsfw: info.is_nsfw,
        is_recognized_format: info.is_extension,
        is_heuristic: false,
        entry_class: info.entry_class().map(str::to_string),
        lib_version: lib_version(&info.version_name),
    })
}

/// Best-effort identity from `<prefix>-<lang>-<name>-v<version>.apk`
pub fn from_file_name(apk_path: &Path) -> Result<ExtensionMetadata> {
    let stem = apk_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| BridgeError::Validation(format!("Unusable file name: {}", apk_path.display())))?;

    let (lang, raw_name, declared_version) = match FILE_NAME_PATTERN.captures(stem) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str()).unwrap_or("all").to_string(),
            caps.get(2).map(|m| m.as_str()).unwrap_or("unknown").to_string(),
            caps.get(3).map(|m| m.as_str().to_string()),
        ),
        None => ("all".to_string(), "unknown".to_string(), None),
    };

    let package_segment = raw_name.to_lowercase().replace(['-', ' '], "");
    let package_name = format!("{}.{}.{}", EXTENSION_PACKAGE_PREFIX, lang, package_segment);
    let display_name = if raw_name == "unknown" {
        "Unknown".to_string()
    } else {
        raw_name.replace('_', " ")
    };

    // Without a `-v<version>` suffix there is nothing to derive a code from
    let version_code = declared_version
        .as_deref()
        .and_then(|v| TRAILING_NUMBER.captures(v))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(1);
    let version = declared_version.unwrap_or_else(|| "1.0.0".to_string());

    let entry_class = format!("{}.{}", package_name, display_name.replace(' ', ""));

    Ok(ExtensionMetadata {
        package_name,
        display_name,
        lib_version: lib_version(&version),
        version_name: version,
        version_code,
        lang,
        is_nsfw: false,
        is_recognized_format: true,
        is_heuristic: true,
        entry_class: Some(entry_class),
    })
}
