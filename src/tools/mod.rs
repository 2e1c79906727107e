use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::settings::ToolExes;

/// Run a subprocess
mod run_cmd;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to launch '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' failed ({status}); last stderr lines:\n{stderr_tail}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr_tail: String,
    },
}

/// A fully-specified external tool invocation.
///
/// Plain invocations tee the tool's stdout/stderr to the terminal and to
/// per-stage log files. Every output the tool writes itself goes through
/// `staged_arg`: the tool is handed a `.tmp` sibling of the real path, which
/// is renamed into place only after a successful exit. `capture_stdout` does
/// the same for stdout. Either way, a tool that dies mid-write never leaves
/// a partial file under an artifact's real name.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    stdout_to: Option<PathBuf>,
    staged: Vec<(PathBuf, PathBuf)>,
}

impl Invocation {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::with_capacity(8),
            stdout_to: None,
            staged: Vec::new(),
        }
    }

    fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Pass an output path to the tool as a `.tmp` sibling; the real path
    /// only appears after the tool exits successfully.
    fn staged_arg(mut self, out: &Path) -> Self {
        let tmp = run_cmd::tmp_path(out);
        self.args.push(tmp.clone().into_os_string());
        self.staged.push((tmp, out.to_path_buf()));
        self
    }

    fn capture_stdout(mut self, path: PathBuf) -> Self {
        self.stdout_to = Some(path);
        self
    }

    /// The invocation rendered as a shell-style line, for plan output and logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        if let Some(out) = &self.stdout_to {
            line.push_str(&format!(" > {}", out.display()));
        }
        line
    }

    /// Run the tool to completion. Non-zero exit is an error carrying the
    /// exit status and the tail of the tool's stderr.
    pub fn run(&self, stage: &str, fs: &crate::fs::Fs, log_dir: &Path, verbose: bool) -> Result<()> {
        run_cmd::run_cmd(self, stage, fs, log_dir, verbose)
    }
}

// stand-in invocations for exercising Stage logic without real tools:
#[cfg(test)]
impl Invocation {
    pub(crate) fn test_producer(path: PathBuf) -> Self {
        Self::new("sh")
            .arg("-c")
            .arg(format!("touch '{}'", path.display()))
    }

    pub(crate) fn test_noop() -> Self {
        Self::new("sh").arg("-c").arg("true")
    }

    pub(crate) fn test_failing() -> Self {
        Self::new("sh").arg("-c").arg("echo stub tool failure >&2; exit 1")
    }
}

/// Per-read haplotype tag restriction for alignment-consuming tools.
#[derive(Debug, Clone)]
pub struct TagFilter {
    pub name: &'static str,
    pub value: u8,
    /// retain reads carrying no tag at all (unphased/mixed evidence)
    pub keep_missing: bool,
}

/// Options shared by every consensus invocation.
#[derive(Debug, Clone)]
pub struct ConsensusOptions {
    pub model: String,
    pub threads: usize,
    pub batch_size: usize,
    pub region: Option<String>,
    pub tag_filter: Option<TagFilter>,
}

/// Builds concrete invocations of the external collaborators.
///
/// Each method is a thin adapter: it declares how inputs, outputs and options
/// map onto one tool's command line, nothing more.
#[derive(Debug)]
pub struct Toolchain {
    medaka: String,
    whatshap: String,
    samtools: String,
    bgzip: String,
    tabix: String,
}

impl Toolchain {
    pub fn new(exes: &ToolExes) -> Self {
        Self {
            medaka: exes.medaka.clone(),
            whatshap: exes.whatshap.clone(),
            samtools: exes.samtools.clone(),
            bgzip: exes.bgzip.clone(),
            tabix: exes.tabix.clone(),
        }
    }

    /// Restrict an alignment to reads overlapping a region.
    pub fn extract_region(&self, alignment: &Path, region: &str, out: &Path) -> Invocation {
        Invocation::new(&self.samtools)
            .arg("view")
            .arg("-b")
            .arg("-o")
            .staged_arg(out)
            .arg(alignment)
            .arg(region)
    }

    /// Generate consensus probabilities from an alignment.
    pub fn consensus(&self, alignment: &Path, out: &Path, opts: &ConsensusOptions) -> Invocation {
        let mut inv = Invocation::new(&self.medaka)
            .arg("consensus")
            .arg(alignment)
            .staged_arg(out)
            .arg("--model")
            .arg(&opts.model)
            .arg("--threads")
            .arg(opts.threads.to_string())
            .arg("--batch_size")
            .arg(opts.batch_size.to_string());
        if let Some(region) = &opts.region {
            inv = inv.arg("--region").arg(region);
        }
        if let Some(tag) = &opts.tag_filter {
            inv = inv
                .arg("--tag_name")
                .arg(tag.name)
                .arg("--tag_value")
                .arg(tag.value.to_string());
            if tag.keep_missing {
                inv = inv.arg("--tag_keep_missing");
            }
        }
        inv
    }

    /// Threshold-based SNP calling from consensus probabilities.
    pub fn threshold_call(
        &self,
        reference: &Path,
        probs: &Path,
        out: &Path,
        threshold: f64,
        region: Option<&str>,
    ) -> Invocation {
        let mut inv = Invocation::new(&self.medaka)
            .arg("snp")
            .arg(reference)
            .arg(probs)
            .staged_arg(out)
            .arg("--threshold")
            .arg(threshold.to_string());
        if let Some(region) = region {
            inv = inv.arg("--regions").arg(region);
        }
        inv
    }

    /// Full-model variant calling; no threshold is forwarded.
    pub fn full_call(
        &self,
        reference: &Path,
        probs: &Path,
        out: &Path,
        region: Option<&str>,
    ) -> Invocation {
        let mut inv = Invocation::new(&self.medaka)
            .arg("variant")
            .arg(reference)
            .arg(probs)
            .staged_arg(out);
        if let Some(region) = region {
            inv = inv.arg("--regions").arg(region);
        }
        inv
    }

    /// Combine two haplotype call sets into one phased diploid call set.
    pub fn merge_haplotypes(
        &self,
        hap1: &Path,
        hap2: &Path,
        reference: &Path,
        out: &Path,
    ) -> Invocation {
        Invocation::new(&self.medaka)
            .arg("tools")
            .arg("haploid2diploid")
            .arg(hap1)
            .arg(hap2)
            .arg(reference)
            .staged_arg(out)
    }

    /// Phase called variants against the reference and alignment.
    pub fn phase(&self, reference: &Path, calls: &Path, alignment: &Path, out: &Path) -> Invocation {
        Invocation::new(&self.whatshap)
            .arg("phase")
            .arg("-o")
            .staged_arg(out)
            .arg("--reference")
            .arg(reference)
            .arg("--ignore-read-groups")
            .arg(calls)
            .arg(alignment)
    }

    /// Tag each read with the haplotype it supports (1, 2, or no tag).
    /// Unassignable reads are retained untagged, never dropped.
    pub fn haplotag(
        &self,
        reference: &Path,
        compressed_calls: &Path,
        alignment: &Path,
        out: &Path,
    ) -> Invocation {
        Invocation::new(&self.whatshap)
            .arg("haplotag")
            .arg("-o")
            .staged_arg(out)
            .arg("--reference")
            .arg(reference)
            .arg("--ignore-read-groups")
            .arg(compressed_calls)
            .arg(alignment)
    }

    /// Compress a call set. bgzip writes to stdout; we capture it and rename
    /// into place so interrupted runs don't leave a half-written .gz behind.
    pub fn compress(&self, calls: &Path, out: &Path) -> Invocation {
        Invocation::new(&self.bgzip)
            .arg("-c")
            .arg(calls)
            .capture_stdout(out.to_path_buf())
    }

    /// Index a compressed call set (produces `<calls>.tbi`).
    pub fn index_calls(&self, compressed_calls: &Path) -> Invocation {
        Invocation::new(&self.tabix)
            .arg("-p")
            .arg("vcf")
            .arg(compressed_calls)
    }

    /// Index an alignment (produces `<alignment>.bai`).
    pub fn index_alignment(&self, alignment: &Path) -> Invocation {
        Invocation::new(&self.samtools).arg("index").arg(alignment)
    }
}
