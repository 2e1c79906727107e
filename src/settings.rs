use std::path::PathBuf;

use anyhow::Result;

use crate::args::Args;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Required input file not found: {0:?}")]
    MissingInput(PathBuf),
    #[error("Alignment {0:?} has no companion index (expected {1:?})")]
    MissingAlignmentIndex(PathBuf, PathBuf),
    #[error("Heterozygous-call threshold must be strictly between 0 and 1 (got {0})")]
    InvalidThreshold(f64),
    #[error("{0} must be at least 1")]
    InvalidCount(&'static str),
}

/// Which decoder the refinement round uses to turn consensus
/// probabilities into calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Fixed-cutoff heterozygous/homozygous calling.
    Threshold,
    /// Full-model variant decoding; the threshold is not forwarded.
    FullModel,
}

/// External tool executables, overridable from the command line or env.
#[derive(Debug, Clone)]
pub struct ToolExes {
    pub medaka: String,
    pub whatshap: String,
    pub samtools: String,
    pub bgzip: String,
    pub tabix: String,
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are validated and paths resolved.
#[derive(Debug)]
pub struct Settings {
    pub alignment: PathBuf,
    pub reference: PathBuf,
    pub region: Option<String>,
    pub output: PathBuf,
    pub initial_model: String,
    pub refinement_model: String,
    pub threshold: f64,
    pub decode: DecodeMode,
    pub threads: usize,
    pub batch_size: usize,
    pub delete_intermediates: bool,
    pub verbose: u8,
    pub dry_run: bool,
    pub tools: ToolExes,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mut alignment = PathBuf::from(&args.alignment);
        if !alignment.exists() {
            return Err(Error::MissingInput(alignment).into());
        }
        alignment = alignment.canonicalize()?;

        // the source alignment must already be indexed; every derived
        // alignment gets its index from a dedicated indexing invocation.
        let alignment_index = index_path(&alignment);
        if !alignment_index.exists() {
            return Err(Error::MissingAlignmentIndex(alignment, alignment_index).into());
        }

        let mut reference = PathBuf::from(&args.reference);
        if !reference.exists() {
            return Err(Error::MissingInput(reference).into());
        }
        reference = reference.canonicalize()?;

        if !(args.threshold > 0.0 && args.threshold < 1.0) {
            return Err(Error::InvalidThreshold(args.threshold).into());
        }
        if args.threads < 1 {
            return Err(Error::InvalidCount("threads").into());
        }
        if args.batch_size < 1 {
            return Err(Error::InvalidCount("batch size").into());
        }

        let decode = if args.full_model {
            DecodeMode::FullModel
        } else {
            DecodeMode::Threshold
        };

        Ok(Self {
            alignment,
            reference,
            region: args.region,
            output: PathBuf::from(&args.output),
            initial_model: args.initial_model,
            refinement_model: args.refinement_model,
            threshold: args.threshold,
            decode,
            threads: args.threads,
            batch_size: args.batch_size,
            delete_intermediates: args.delete_intermediates,
            verbose: args.verbose,
            dry_run: args.dry_run,
            tools: ToolExes {
                medaka: args.medaka_exe,
                whatshap: args.whatshap_exe,
                samtools: args.samtools_exe,
                bgzip: args.bgzip_exe,
                tabix: args.tabix_exe,
            },
        })
    }
}

/// Companion index path for a BAM file: `<file>.bai`.
fn index_path(alignment: &PathBuf) -> PathBuf {
    let mut s = alignment.clone().into_os_string();
    s.push(".bai");
    PathBuf::from(s)
}
