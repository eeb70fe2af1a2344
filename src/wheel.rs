//! Wheel archive extraction.
//!
//! A wheel is a zip file whose `*.dist-info/RECORD` lists every installed path. Only
//! the code entries are written out; packaging metadata and `.data` payloads stay in
//! the archive. The METADATA file supplies the plugin's dependencies.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::StoreError;
use crate::requirement::dependencies_from_metadata;

/// File that makes a directory an importable package
pub const PACKAGE_MARKER: &str = "__init__.py";

const RECORD_FILE: &str = "RECORD";
const METADATA_FILE: &str = "METADATA";

/// Largest single archive entry that will be read into memory
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// One row of a RECORD file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    /// `algorithm=urlsafe-b64-digest`, empty for RECORD itself
    pub hash: Option<String>,
    pub size: Option<u64>,
}

impl ManifestEntry {
    /// Code entries: not under `*.dist-info/` or `*.data/`, not a directory
    pub fn is_code(&self) -> bool {
        if self.path.is_empty() || self.path.ends_with('/') {
            return false;
        }
        let dirs = self.path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        !dirs
            .split('/')
            .any(|seg| seg.ends_with(".dist-info") || seg.ends_with(".data"))
    }

    fn verify(&self, data: &[u8]) -> Result<(), StoreError> {
        let Some(hash) = self.hash.as_deref() else {
            return Ok(());
        };
        match hash.split_once('=') {
            Some(("sha256", expected)) => {
                let actual = URL_SAFE_NO_PAD.encode(&Sha256::digest(data)[..]);
                if actual != expected.trim_end_matches('=') {
                    return Err(StoreError::IntegrityMismatch(self.path.clone()));
                }
                Ok(())
            }
            _ => {
                debug!(path = %self.path, hash = %hash, "Skipping unsupported RECORD digest");
                Ok(())
            }
        }
    }
}

/// Parse RECORD text; rows that cannot be read are skipped
pub fn parse_record(text: &str) -> Vec<ManifestEntry> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut entries = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable RECORD row");
                continue;
            }
        };
        let Some(path) = row.get(0).map(str::trim).filter(|p| !p.is_empty()) else {
            continue;
        };
        entries.push(ManifestEntry {
            path: path.to_string(),
            hash: row.get(1).filter(|h| !h.is_empty()).map(str::to_string),
            size: row.get(2).and_then(|s| s.trim().parse().ok()),
        });
    }
    entries
}

fn is_dist_info_file(name: &str, file_name: &str) -> bool {
    match name.rsplit_once('/') {
        Some((dir, file)) => {
            file == file_name
                && dir
                    .rsplit('/')
                    .next()
                    .is_some_and(|d| d.ends_with(".dist-info"))
        }
        None => false,
    }
}

fn entry_too_large(name: &str, limit: u64) -> StoreError {
    StoreError::Archive(zip::result::ZipError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("entry {} is larger than {} bytes", name, limit),
    )))
}

/// Relative path that stays inside the destination directory
pub fn safe_relative_path(path: &str) -> Result<PathBuf, StoreError> {
    let candidate = Path::new(path);
    let all_normal = candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if path.is_empty() || !all_normal {
        return Err(StoreError::UnsafePath(path.to_string()));
    }
    Ok(candidate.to_path_buf())
}

/// An opened wheel archive
pub struct Wheel {
    archive: ZipArchive<Cursor<Vec<u8>>>,
}

impl Wheel {
    /// Open raw archive bytes; fails when they are not a zip container
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, StoreError> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self { archive })
    }

    fn dist_info_file(&self, file_name: &str) -> Option<String> {
        self.archive
            .file_names()
            .find(|name| is_dist_info_file(name, file_name))
            .map(str::to_string)
    }

    fn read(&mut self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.read_capped(name, MAX_ENTRY_BYTES)
    }

    // declared sizes come from the archive itself and are never used to pre-allocate
    fn read_capped(&mut self, name: &str, limit: u64) -> Result<Vec<u8>, StoreError> {
        let file = self.archive.by_name(name)?;
        if file.size() > limit {
            return Err(entry_too_large(name, limit));
        }
        let mut buf = Vec::new();
        file.take(limit + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > limit {
            return Err(entry_too_large(name, limit));
        }
        Ok(buf)
    }

    /// Every row of the install manifest
    pub fn manifest(&mut self) -> Result<Vec<ManifestEntry>, StoreError> {
        let record = self
            .dist_info_file(RECORD_FILE)
            .ok_or(StoreError::ManifestMissing)?;
        let data = self.read(&record)?;
        Ok(parse_record(&String::from_utf8_lossy(&data)))
    }

    /// Manifest rows that are program code
    pub fn code_files(&mut self) -> Result<Vec<ManifestEntry>, StoreError> {
        Ok(self
            .manifest()?
            .into_iter()
            .filter(ManifestEntry::is_code)
            .collect())
    }

    /// Installer-ready dependency strings; empty when the wheel has no METADATA
    pub fn dependencies(&mut self) -> Result<Vec<String>, StoreError> {
        let Some(metadata) = self.dist_info_file(METADATA_FILE) else {
            debug!("Wheel has no METADATA file");
            return Ok(Vec::new());
        };
        let data = self.read(&metadata)?;
        Ok(dependencies_from_metadata(&String::from_utf8_lossy(&data)))
    }

    /// Write every code file under `dest`, returning the relative paths written
    pub fn extract_code(
        &mut self,
        dest: &Path,
        verify_hashes: bool,
    ) -> Result<Vec<String>, StoreError> {
        let code_files = self.code_files()?;
        let mut written = Vec::with_capacity(code_files.len());
        for entry in code_files {
            let relative = safe_relative_path(&entry.path)?;
            let data = self.read(&entry.path)?;
            if verify_hashes {
                entry.verify(&data)?;
            }
            let out = dest.join(&relative);
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&out, &data)?;
            written.push(entry.path);
        }
        debug!(dest = ?dest, files = written.len(), "Extracted wheel code files");
        Ok(written)
    }
}

/// Make sure `dest` holds `__init__.py` at its root.
///
/// When the archive packaged its code one folder deeper, the contents of that one
/// folder are promoted into `dest` (directories merge, files overwrite). The folder
/// named `module_name` is preferred; otherwise the only top-level folder holding
/// `__init__.py` is used. Other top-level folders are left where they are.
/// Returns whether a repair happened.
pub fn ensure_package_root(dest: &Path, module_name: &str) -> Result<bool, StoreError> {
    if dest.join(PACKAGE_MARKER).is_file() {
        return Ok(false);
    }
    let Some(package) = package_folder(dest, module_name)? else {
        return Err(StoreError::MissingPackageMarker(dest.to_path_buf()));
    };
    info!(
        dest = ?dest,
        package = ?package,
        "No package marker at plugin root, promoting nested package"
    );
    promote(dest, &package)?;
    if !dest.join(PACKAGE_MARKER).is_file() {
        return Err(StoreError::MissingPackageMarker(dest.to_path_buf()));
    }
    Ok(true)
}

/// The top-level folder to promote, `None` when there is no single candidate
fn package_folder(dest: &Path, module_name: &str) -> io::Result<Option<PathBuf>> {
    let named = dest.join(module_name);
    if named.is_dir() {
        return Ok(Some(named));
    }

    let mut packages = Vec::new();
    for entry in fs::read_dir(dest)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.path().join(PACKAGE_MARKER).is_file() {
            packages.push(entry.path());
        }
    }
    if packages.len() > 1 {
        warn!(
            dest = ?dest,
            candidates = packages.len(),
            "Several top-level packages, none named after the module"
        );
        return Ok(None);
    }
    Ok(packages.pop())
}

fn promote(dest: &Path, package: &Path) -> io::Result<()> {
    // moved aside first so a child can take its parent's name
    let aside = dest.join(".promote");
    fs::rename(package, &aside)?;
    for entry in fs::read_dir(&aside)? {
        let entry = entry?;
        merge_move(&entry.path(), &dest.join(entry.file_name()))?;
    }
    fs::remove_dir(&aside)
}

fn merge_move(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() && dst.is_dir() {
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            merge_move(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return fs::remove_dir(src);
    }
    if dst.is_dir() {
        fs::remove_dir_all(dst)?;
    } else if dst.exists() {
        fs::remove_file(dst)?;
    }
    fs::rename(src, dst)
}
