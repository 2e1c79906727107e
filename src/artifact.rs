use std::path::{Path, PathBuf};

use crate::fs::Fs;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Required artifact not found: {name} ({path:?})")]
    Missing { name: String, path: PathBuf },
}

/// What a file-backed unit of pipeline state contains.
///
/// Alignments and compressed call sets are only usable together with a
/// companion index, so they count as not-existing until the index is there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Aligned reads (BAM); needs a `.bai` companion.
    Alignment,
    /// Reference sequence (FASTA).
    Reference,
    /// Per-position consensus probabilities (HDF).
    ProbabilityStore,
    /// Uncompressed call set (VCF).
    Calls,
    /// Compressed call set (VCF.GZ); needs a `.tbi` companion.
    CompressedCalls,
    /// A companion index file.
    Index,
}

impl ArtifactKind {
    /// Suffix of the companion index this kind needs before it is usable.
    pub fn index_suffix(self) -> Option<&'static str> {
        match self {
            Self::Alignment => Some(".bai"),
            Self::CompressedCalls => Some(".tbi"),
            _ => None,
        }
    }
}

/// A named, file-backed unit of pipeline state.
///
/// The location is relative to the run's output directory for everything the
/// pipeline produces; the source alignment and reference are referenced by
/// absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// logical name, used in messages and skip/cleanup decisions
    pub name: String,
    pub location: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn new<T: Into<String>, U: Into<PathBuf>>(name: T, location: U, kind: ArtifactKind) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            kind,
        }
    }

    /// The companion index artifact, for kinds that require one.
    pub fn index_companion(&self) -> Option<Artifact> {
        self.kind.index_suffix().map(|suffix| {
            let mut location = self.location.clone().into_os_string();
            location.push(suffix);
            Artifact {
                name: format!("{} index", self.name),
                location: PathBuf::from(location),
                kind: ArtifactKind::Index,
            }
        })
    }
}

/// Resolves logical artifacts to filesystem locations and answers the
/// "exists and is indexed" question that skip/resume logic is built on.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Physical location of an artifact.
    pub fn resolve(&self, artifact: &Artifact) -> PathBuf {
        if artifact.location.is_absolute() {
            artifact.location.clone()
        } else {
            self.root.join(&artifact.location)
        }
    }

    /// Whether an artifact is present and usable. An alignment or compressed
    /// call set without its companion index is treated as not-existing, so a
    /// half-finished stage is redone rather than crashing a downstream tool.
    pub fn exists(&self, artifact: &Artifact, fs: &Fs) -> bool {
        if !fs.exists(self.resolve(artifact)) {
            return false;
        }
        match artifact.index_companion() {
            Some(index) => fs.exists(self.resolve(&index)),
            None => true,
        }
    }

    /// Fail fast if any of the given artifacts is missing, naming the first
    /// missing path (the index companion if that's the part that's absent).
    pub fn require_existing<'a, I>(&self, artifacts: I, fs: &Fs) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'a Artifact>,
    {
        for artifact in artifacts {
            let path = self.resolve(artifact);
            if !fs.exists(&path) {
                return Err(Error::Missing {
                    name: artifact.name.clone(),
                    path,
                });
            }
            if let Some(index) = artifact.index_companion() {
                let path = self.resolve(&index);
                if !fs.exists(&path) {
                    return Err(Error::Missing {
                        name: index.name,
                        path,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_index_companion() {
        let bam = Artifact::new("tagged alignment", "tagged.bam", ArtifactKind::Alignment);
        let index = bam.index_companion().unwrap();
        assert_eq!(index.location, PathBuf::from("tagged.bam.bai"));
        assert_eq!(index.kind, ArtifactKind::Index);

        let vcf = Artifact::new("phased calls", "phased.vcf.gz", ArtifactKind::CompressedCalls);
        assert_eq!(
            vcf.index_companion().unwrap().location,
            PathBuf::from("phased.vcf.gz.tbi")
        );

        let probs = Artifact::new("probs", "probs.hdf", ArtifactKind::ProbabilityStore);
        assert!(probs.index_companion().is_none());
    }

    #[test]
    fn test_exists_requires_companion_index() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let store = ArtifactStore::new(dir.path());
        let bam = Artifact::new("alignment", "reads.bam", ArtifactKind::Alignment);

        assert!(!store.exists(&bam, &fs));

        std::fs::write(dir.path().join("reads.bam"), "")?;
        assert!(!store.exists(&bam, &fs), "unindexed alignment counts as missing");

        std::fs::write(dir.path().join("reads.bam.bai"), "")?;
        assert!(store.exists(&bam, &fs));
        Ok(())
    }

    #[test]
    fn test_require_existing_names_missing_path() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let store = ArtifactStore::new(dir.path());

        let present = Artifact::new("probs", "probs.hdf", ArtifactKind::ProbabilityStore);
        std::fs::write(dir.path().join("probs.hdf"), "")?;
        let absent = Artifact::new("unphased calls", "unphased.vcf", ArtifactKind::Calls);

        let err = store
            .require_existing([&present, &absent], &fs)
            .unwrap_err();
        let Error::Missing { name, path } = err;
        assert_eq!(name, "unphased calls");
        assert_eq!(path, dir.path().join("unphased.vcf"));
        Ok(())
    }

    #[test]
    fn test_resolve_absolute_location() {
        let store = ArtifactStore::new(Path::new("/out"));
        let external = Artifact::new("source alignment", "/data/reads.bam", ArtifactKind::Alignment);
        assert_eq!(store.resolve(&external), PathBuf::from("/data/reads.bam"));
        let derived = Artifact::new("probs", "probs.hdf", ArtifactKind::ProbabilityStore);
        assert_eq!(store.resolve(&derived), PathBuf::from("/out/probs.hdf"));
    }
}
