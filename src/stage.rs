use std::path::Path;

use anyhow::Result;

use crate::artifact::{self, Artifact, ArtifactStore};
use crate::fs::Fs;
use crate::tools::Invocation;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stage '{stage}': missing input artifact '{name}' ({path:?})")]
    MissingInput {
        stage: String,
        name: String,
        path: std::path::PathBuf,
    },
    #[error("stage '{stage}': expected output artifact '{name}' was not produced ({path:?})")]
    MissingOutput {
        stage: String,
        name: String,
        path: std::path::PathBuf,
    },
    #[error("stage '{stage}' failed: {source:#}")]
    Tool { stage: String, source: anyhow::Error },
}

/// What happened when a stage was asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All outputs (and their indexes) already existed; nothing was executed.
    Skipped,
    /// The tool ran and all outputs were confirmed on disk.
    Executed,
}

/// A named, idempotent unit of execution binding one tool invocation to its
/// declared input and output artifacts.
///
/// A stage never executes when its outputs are already complete; that skip is
/// what makes a crashed-and-restarted run resume instead of redoing finished
/// work. Completion is purely a function of the filesystem, never of
/// in-memory history.
pub struct Stage {
    pub name: String,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    invocation: Invocation,
    /// companion-index invocations, run right after the main tool succeeds
    index_cmds: Vec<Invocation>,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Artifact>,
        outputs: Vec<Artifact>,
        invocation: Invocation,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            invocation,
            index_cmds: Vec::with_capacity(0),
        }
    }

    /// Add an indexing invocation to run synchronously after the main tool,
    /// for an output whose kind requires a companion index.
    pub fn with_index_cmd(mut self, cmd: Invocation) -> Self {
        self.index_cmds.push(cmd);
        self
    }

    /// The completion predicate: all declared outputs exist, including any
    /// required companion indexes.
    pub fn is_complete(&self, store: &ArtifactStore, fs: &Fs) -> bool {
        self.outputs.iter().all(|out| store.exists(out, fs))
    }

    /// The main invocation, rendered for plan output.
    pub fn command_line(&self) -> String {
        self.invocation.command_line()
    }

    /// Run this stage:
    /// 1. skip if already complete,
    /// 2. fail fast if an input is missing (upstream never ran),
    /// 3. invoke the tool, then any companion indexers,
    /// 4. confirm all outputs actually appeared.
    pub fn run(
        &self,
        store: &ArtifactStore,
        fs: &Fs,
        log_dir: &Path,
        verbose: bool,
    ) -> Result<Outcome> {
        if self.is_complete(store, fs) {
            log::info!("stage '{}' already complete", self.name);
            return Ok(Outcome::Skipped);
        }

        store
            .require_existing(&self.inputs, fs)
            .map_err(|artifact::Error::Missing { name, path }| Error::MissingInput {
                stage: self.name.clone(),
                name,
                path,
            })?;

        self.invoke(&self.invocation, fs, log_dir, verbose)?;
        for cmd in &self.index_cmds {
            self.invoke(cmd, fs, log_dir, verbose)?;
        }

        store
            .require_existing(&self.outputs, fs)
            .map_err(|artifact::Error::Missing { name, path }| Error::MissingOutput {
                stage: self.name.clone(),
                name,
                path,
            })?;

        Ok(Outcome::Executed)
    }

    fn invoke(&self, cmd: &Invocation, fs: &Fs, log_dir: &Path, verbose: bool) -> Result<()> {
        cmd.run(&self.name, fs, log_dir, verbose)
            .map_err(|source| Error::Tool {
                stage: self.name.clone(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use tempfile::tempdir;

    struct Fixture {
        dir: tempfile::TempDir,
        fs: Fs,
        store: ArtifactStore,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let fs = Fs::new(dir.path(), false);
        let store = ArtifactStore::new(dir.path());
        fs.create_dir(dir.path().join("logs")).unwrap();
        Fixture { dir, fs, store }
    }

    impl Fixture {
        fn logs(&self) -> std::path::PathBuf {
            self.dir.path().join("logs")
        }

        fn touch(&self, file: &str) {
            std::fs::write(self.dir.path().join(file), "").unwrap();
        }
    }

    /// An invocation that creates the file a stage declares as output.
    fn producing(fx: &Fixture, file: &str) -> Invocation {
        Invocation::test_producer(fx.dir.path().join(file))
    }

    #[test]
    fn test_skip_when_outputs_exist() {
        let fx = fixture();
        fx.touch("calls.vcf");
        // invocation would fail if ever spawned
        let stage = Stage::new(
            "call",
            vec![],
            vec![Artifact::new("calls", "calls.vcf", ArtifactKind::Calls)],
            Invocation::test_failing(),
        );
        let outcome = stage.run(&fx.store, &fx.fs, &fx.logs(), false).unwrap();
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[test]
    fn test_not_complete_without_companion_index() {
        let fx = fixture();
        fx.touch("tagged.bam");
        let stage = Stage::new(
            "haplotag",
            vec![],
            vec![Artifact::new("tagged", "tagged.bam", ArtifactKind::Alignment)],
            Invocation::test_failing(),
        );
        assert!(!stage.is_complete(&fx.store, &fx.fs));
        fx.touch("tagged.bam.bai");
        assert!(stage.is_complete(&fx.store, &fx.fs));
    }

    #[test]
    fn test_missing_input_fails_fast_with_path() {
        let fx = fixture();
        let stage = Stage::new(
            "consensus",
            vec![Artifact::new("alignment", "reads.bam", ArtifactKind::Alignment)],
            vec![Artifact::new("probs", "probs.hdf", ArtifactKind::ProbabilityStore)],
            Invocation::test_failing(),
        );
        let err = stage.run(&fx.store, &fx.fs, &fx.logs(), false).unwrap_err();
        let stage_err = err.downcast_ref::<Error>().unwrap();
        match stage_err {
            Error::MissingInput { stage, name, path } => {
                assert_eq!(stage, "consensus");
                assert_eq!(name, "alignment");
                assert_eq!(path, &fx.dir.path().join("reads.bam"));
            }
            other => panic!("expected MissingInput, got {other:?}"),
        }
    }

    #[test]
    fn test_executes_and_confirms_outputs() {
        let fx = fixture();
        fx.touch("probs.hdf");
        let stage = Stage::new(
            "call",
            vec![Artifact::new("probs", "probs.hdf", ArtifactKind::ProbabilityStore)],
            vec![Artifact::new("calls", "calls.vcf", ArtifactKind::Calls)],
            producing(&fx, "calls.vcf"),
        );
        let outcome = stage.run(&fx.store, &fx.fs, &fx.logs(), false).unwrap();
        assert_eq!(outcome, Outcome::Executed);
        assert!(fx.dir.path().join("calls.vcf").exists());

        // second run skips without touching the tool
        let outcome = stage.run(&fx.store, &fx.fs, &fx.logs(), false).unwrap();
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[test]
    fn test_tool_failure_is_wrapped_with_stage_name() {
        let fx = fixture();
        let stage = Stage::new(
            "phase",
            vec![],
            vec![Artifact::new("phased", "phased.vcf", ArtifactKind::Calls)],
            Invocation::test_failing(),
        );
        let err = stage.run(&fx.store, &fx.fs, &fx.logs(), false).unwrap_err();
        assert!(format!("{err:#}").contains("stage 'phase' failed"));
    }

    #[test]
    fn test_vanishing_output_is_reported() {
        let fx = fixture();
        // tool succeeds but never writes the declared output
        let stage = Stage::new(
            "call",
            vec![],
            vec![Artifact::new("calls", "calls.vcf", ArtifactKind::Calls)],
            Invocation::test_noop(),
        );
        let err = stage.run(&fx.store, &fx.fs, &fx.logs(), false).unwrap_err();
        let stage_err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(stage_err, Error::MissingOutput { .. }));
    }
}
