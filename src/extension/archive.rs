//! APK archive access
//!
//! Thin helpers over `zip` used by the validator, the metadata extractor and the
//! desktop conversion pipeline.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::ZipArchive;

use crate::core::error::{BridgeError, Result};

pub const DEX_ENTRY: &str = "classes.dex";
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";
const ASSETS_PREFIX: &str = "assets/";

pub fn open(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file)
        .map_err(|e| BridgeError::Archive(format!("{} is not a readable archive: {}", path.display(), e)))
}

pub fn has_entry(archive: &ZipArchive<File>, name: &str) -> bool {
    archive.index_for_name(name).is_some()
}

pub fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| BridgeError::Archive(format!("No {} found", name)))?;

    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Copy one entry to `dest`, creating parent directories
pub fn extract_entry(archive: &mut ZipArchive<File>, name: &str, dest: &Path) -> Result<()> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| BridgeError::Archive(format!("No {} found", name)))?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(dest)?;
    std::io::copy(&mut entry, &mut out)?;
    out.flush()?;
    Ok(())
}

fn icon_density_rank(name: &str) -> u8 {
    if name.contains("xxxhdpi") {
        4
    } else if name.contains("xxhdpi") {
        3
    } else if name.contains("xhdpi") {
        2
    } else if name.contains("hdpi") {
        1
    } else {
        0
    }
}

/// Copy the densest launcher icon to `<dest_dir>/<package>.png`
///
/// Icons are cosmetic; any failure is logged and yields `None`.
pub fn extract_icon(apk_path: &Path, dest_dir: &Path, package: &str) -> Option<PathBuf> {
    let result = (|| -> Result<Option<PathBuf>> {
        let mut archive = open(apk_path)?;

        let best = archive
            .file_names()
            .filter(|n| n.contains("ic_launcher") && n.ends_with(".png"))
            .max_by_key(|n| icon_density_rank(n))
            .map(str::to_string);

        let Some(name) = best else {
            return Ok(None);
        };

        let dest = dest_dir.join(format!("{}.png", package));
        extract_entry(&mut archive, &name, &dest)?;
        Ok(Some(dest))
    })();

    match result {
        Ok(icon) => icon,
        Err(e) => {
            tracing::debug!(package = %package, error = %e, "Icon extraction failed");
            None
        }
    }
}

/// Hex SHA-256 of a file
pub fn checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Rewrite `jar` with the APK's `assets/` entries appended
///
/// Signature files under `META-INF/` are dropped since the merged jar no longer matches
/// them. Returns the number of assets merged; the jar is untouched when there are none.
pub fn merge_assets(apk_path: &Path, jar_path: &Path) -> Result<usize> {
    let mut apk = open(apk_path)?;

    let assets: Vec<String> = apk
        .file_names()
        .filter(|n| n.starts_with(ASSETS_PREFIX) && !n.ends_with('/'))
        .map(str::to_string)
        .collect();

    if assets.is_empty() {
        return Ok(0);
    }

    let tmp_path = jar_path.with_extension("jar.tmp");
    let result = (|| -> Result<()> {
        let mut jar = open(jar_path)?;
        let mut writer = zip::ZipWriter::new(File::create(&tmp_path)?);
        let options = SimpleFileOptions::default();

        for i in 0..jar.len() {
            let mut entry = jar.by_index(i)?;
            let name = entry.name().to_string();
            if name.starts_with("META-INF/") || entry.is_dir() {
                continue;
            }
            writer.start_file(name.as_str(), options)?;
            std::io::copy(&mut entry, &mut writer)?;
        }

        for name in &assets {
            if has_entry(&jar, name) {
                continue;
            }
            let mut entry = apk.by_name(name)?;
            writer.start_file(name.as_str(), options)?;
            std::io::copy(&mut entry, &mut writer)?;
        }

        writer.finish()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, jar_path)?;
    Ok(assets.len())
}

/// File removed on drop unless kept
///
/// Guards intermediate artifacts (extracted dex, partial downloads, converted jars) so
/// every early return and error path cleans up after itself.
pub struct ScratchFile {
    path: PathBuf,
    kept: bool,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kept: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand back the path
    pub fn keep(mut self) -> PathBuf {
        self.kept = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.kept || !self.path.exists() {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file");
        }
    }
}

/// Moves an existing file aside while its replacement is tried
///
/// `commit` deletes the saved copy. Dropping the guard uncommitted removes whatever
/// now sits at the target and puts the saved copy back.
pub struct FileBackup {
    target: PathBuf,
    backup: Option<PathBuf>,
    committed: bool,
}

impl FileBackup {
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let backup = if target.exists() {
            let mut name = target.clone().into_os_string();
            name.push(".backup");
            let backup = PathBuf::from(name);
            if backup.exists() {
                fs::remove_file(&backup)?;
            }
            fs::rename(&target, &backup)?;
            tracing::debug!(target = %target.display(), backup = %backup.display(), "Moved existing file aside");
            Some(backup)
        } else {
            None
        };

        Ok(Self {
            target,
            backup,
            committed: false,
        })
    }

    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        if let Some(backup) = &self.backup {
            fs::remove_file(backup)?;
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if self.target.exists() {
            fs::remove_file(&self.target)?;
        }
        if let Some(backup) = &self.backup {
            fs::rename(backup, &self.target)?;
            tracing::debug!(target = %self.target.display(), "Restored previous file");
        }
        Ok(())
    }
}

impl Drop for FileBackup {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = self.rollback() {
            tracing::error!(target = %self.target.display(), error = %e, "Failed to restore previous file");
        }
    }
}
