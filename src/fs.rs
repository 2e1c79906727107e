use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Specified output directory {0:?} is not a directory")]
    NotDirectory(PathBuf),
    #[error("Can't perform IO operation: {0:?} is not whitelisted")]
    NotWhitelisted(PathBuf),
    #[error("Dry run. Not writing to {0:?}")]
    DryRun(PathBuf),
}

/// All file operations in the crate should go through this struct.
///
/// All destructive operations check that the path in question is a child of the
/// single whitelisted prefix (the output dir), otherwise they will not be
/// performed. External tools write wherever their arguments point them; it is
/// the stage graph's job to only ever point them inside the output dir.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    output_prefix: PathBuf,
    /// if true, prevents all destructive operations
    dry_run: bool,
}

impl Fs {
    /// Create a new `Fs` with the given output directory.
    pub fn new(output_prefix: &Path, dry_run: bool) -> Self {
        Self {
            output_prefix: output_prefix.to_path_buf(),
            dry_run,
        }
    }

    /// The whitelisted output directory.
    pub fn root(&self) -> &Path {
        &self.output_prefix
    }

    /// $OUTPUT/logs, where per-stage tool output is stored.
    pub fn logs_dir(&self) -> PathBuf {
        self.output_prefix.join("logs")
    }

    /// Check whether output dir exists, and create it if not.
    pub fn ensure_output_dir_exists(&mut self, verbose: bool) -> Result<()> {
        if !self.output_prefix.exists() {
            if self.dry_run {
                eprintln!(
                    "Dry run. Not creating output directory {:?}",
                    self.output_prefix
                );
                return Ok(());
            }
            eprintln!(
                "Output directory {:?} doesn't exist. Creating.",
                self.output_prefix
            );
            fs::create_dir_all(&self.output_prefix).context("creating output directory")?;
        } else if !self.output_prefix.is_dir() {
            return Err(Error::NotDirectory(self.output_prefix.clone()).into());
        } else if verbose {
            eprintln!(
                "Output directory {:?} already exists. Not creating.",
                self.output_prefix
            );
        }

        self.output_prefix = self.output_prefix.canonicalize()?;
        Ok(())
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().exists()
    }

    /// Create a directory (uses `std::fs::create_dir_all`).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Create a file, and return a writable `File` handle.
    pub fn create_file<T: AsRef<Path>>(&self, path: T) -> Result<fs::File> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        let f = fs::File::create(path).context("creating file")?;
        Ok(f)
    }

    /// Delete a file.
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Atomically rename `from` to `to`; both must be inside the output dir.
    pub fn rename<T: AsRef<Path>, U: AsRef<Path>>(&self, from: T, to: U) -> Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        self.check_whitelist(from)?;
        self.check_whitelist(to)?;
        fs::rename(from, to).with_context(|| format!("renaming {:?} to {:?}", from, to))?;
        Ok(())
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().starts_with(&self.output_prefix)
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            Err(Error::DryRun(path.to_path_buf()).into())
        } else if !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_path_buf()).into())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_whitelist_rejects_outside_paths() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        assert!(fs.create_file("/tmp/definitely-not-whitelisted").is_err());
        assert!(fs.create_file(dir.path().join("ok.txt")).is_ok());
        Ok(())
    }

    #[test]
    fn test_dry_run_blocks_destructive_ops() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), true);
        let err = fs.create_file(dir.path().join("nope.txt")).unwrap_err();
        assert!(!dir.path().join("nope.txt").exists());

        // a dry-run block is reported as such, not as a whitelist miss
        let msg = format!("{err:#}");
        assert!(msg.contains("Dry run"), "{msg}");
        assert!(!msg.contains("whitelisted"), "{msg}");
        Ok(())
    }

    #[test]
    fn test_rename_within_output_dir() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let from = dir.path().join("a.tmp");
        let to = dir.path().join("a");
        std::fs::write(&from, "x")?;
        fs.rename(&from, &to)?;
        assert!(!from.exists());
        assert!(to.exists());
        Ok(())
    }
}
