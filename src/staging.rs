//! Transactional plugin installation.
//!
//! A wheel is extracted, repaired and given its `requirements.txt` inside a temporary
//! directory under the plugins root. Only a fully prepared plugin is renamed into
//! `<plugins-root>/<module>`; the temporary directory is removed on every exit path.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::wheel::{self, Wheel};

/// Generated dependency list inside each plugin directory
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

const STAGING_PREFIX: &str = ".staging-";

/// A plugin extracted into a staging directory, not yet visible to the loader
#[derive(Debug)]
pub struct StagedPlugin {
    guard: TempDir,
    dir: PathBuf,
    files: Vec<String>,
    dependencies: Vec<String>,
    repaired: bool,
}

impl StagedPlugin {
    /// Extract `bytes` into a fresh staging directory under `plugins_root`
    pub fn prepare(
        bytes: Vec<u8>,
        plugins_root: &Path,
        module_name: &str,
        verify_hashes: bool,
    ) -> Result<Self, StoreError> {
        wheel::safe_relative_path(module_name)?;
        fs::create_dir_all(plugins_root)?;
        // same filesystem as the target so the final rename is atomic
        let guard = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(plugins_root)?;
        let dir = guard.path().join(module_name);
        fs::create_dir_all(&dir)?;

        let mut wheel = Wheel::from_bytes(bytes)?;
        let files = wheel.extract_code(&dir, verify_hashes)?;
        let dependencies = wheel.dependencies()?;
        let repaired = wheel::ensure_package_root(&dir, module_name)?;
        write_requirements(&dir.join(REQUIREMENTS_FILE), &dependencies)?;

        debug!(
            module = %module_name,
            files = files.len(),
            dependencies = dependencies.len(),
            repaired,
            "Staged plugin"
        );
        Ok(Self {
            guard,
            dir,
            files,
            dependencies,
            repaired,
        })
    }

    /// Code files written, relative to the archive root
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Installer-ready dependency strings
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Whether the nested-folder repair ran
    pub fn repaired(&self) -> bool {
        self.repaired
    }

    /// Path of the staged plugin directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Move the staged plugin to `target`, replacing any existing directory there
    pub fn commit(self, target: &Path) -> Result<(), StoreError> {
        if target.exists() {
            debug!(target = ?target, "Removing previous plugin directory");
            fs::remove_dir_all(target)?;
        }
        fs::rename(&self.dir, target)?;
        info!(target = ?target, staging = ?self.guard.path(), "Committed staged plugin");
        Ok(())
    }
}

fn write_requirements(path: &Path, dependencies: &[String]) -> Result<(), StoreError> {
    let mut content = String::new();
    for dep in dependencies {
        content.push_str(dep);
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

fn is_staging_dir(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Staging directories under `plugins_root`; any found outside a running install were
/// left behind by an interrupted process
pub fn leftover_staging_dirs(plugins_root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !plugins_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut leftovers = Vec::new();
    for entry in fs::read_dir(plugins_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && is_staging_dir(&entry.file_name().to_string_lossy()) {
            leftovers.push(entry.path());
        }
    }
    leftovers.sort();
    Ok(leftovers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// Wheel without RECORD hashes whose package folder matches the module name
    fn nested_wheel() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("demo/__init__.py", options).unwrap();
        writer.write_all(b"NAME = 'demo'\n").unwrap();
        writer
            .start_file("demo-1.0.0.dist-info/METADATA", options)
            .unwrap();
        writer
            .write_all(b"Name: demo\nRequires-Dist: httpx (>=0.24)\nRequires-Dist: tomli; python_version<'3.11'\n")
            .unwrap();
        writer
            .start_file("demo-1.0.0.dist-info/RECORD", options)
            .unwrap();
        writer
            .write_all(b"demo/__init__.py,,\ndemo-1.0.0.dist-info/METADATA,,\ndemo-1.0.0.dist-info/RECORD,,\n")
            .unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn leftovers(root: &Path) -> Vec<PathBuf> {
        leftover_staging_dirs(root).unwrap()
    }

    #[test]
    fn test_prepare_and_commit() {
        let root = TempDir::new().unwrap();
        let staged = StagedPlugin::prepare(nested_wheel(), root.path(), "demo", true).unwrap();
        assert!(staged.repaired());
        assert_eq!(staged.files(), ["demo/__init__.py"]);
        assert!(!root.path().join("demo").exists());

        staged.commit(&root.path().join("demo")).unwrap();
        assert!(root.path().join("demo/__init__.py").is_file());
        assert_eq!(
            fs::read_to_string(root.path().join("demo").join(REQUIREMENTS_FILE)).unwrap(),
            "httpx>=0.24\ntomli; python_version<\"3.11\"\n"
        );
        assert!(leftovers(root.path()).is_empty());
    }

    #[test]
    fn test_commit_replaces_existing() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("demo");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.py"), "old").unwrap();

        let staged = StagedPlugin::prepare(nested_wheel(), root.path(), "demo", true).unwrap();
        staged.commit(&target).unwrap();
        assert!(!target.join("stale.py").exists());
        assert!(target.join("__init__.py").is_file());
    }

    #[test]
    fn test_failed_prepare_leaves_nothing() {
        let root = TempDir::new().unwrap();
        let err = StagedPlugin::prepare(b"not a zip".to_vec(), root.path(), "demo", true)
            .unwrap_err();
        assert!(matches!(err, StoreError::Archive(_)));
        assert!(!root.path().join("demo").exists());
        assert!(leftovers(root.path()).is_empty());
    }

    #[test]
    fn test_dropped_stage_is_cleaned_up() {
        let root = TempDir::new().unwrap();
        let staged = StagedPlugin::prepare(nested_wheel(), root.path(), "demo", true).unwrap();
        assert!(staged.path().is_dir());
        drop(staged);
        assert!(leftovers(root.path()).is_empty());
    }

    #[test]
    fn test_finds_interrupted_stages() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join(".staging-abc123")).unwrap();
        fs::create_dir(root.path().join("demo")).unwrap();
        fs::write(root.path().join(".staging-note"), "").unwrap();
        assert_eq!(leftovers(root.path()), vec![root.path().join(".staging-abc123")]);
        assert!(leftover_staging_dirs(&root.path().join("missing"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rejects_unsafe_module_name() {
        let root = TempDir::new().unwrap();
        assert!(matches!(
            StagedPlugin::prepare(nested_wheel(), root.path(), "../escape", true),
            Err(StoreError::UnsafePath(_))
        ));
    }
}
