use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use rustc_hash::FxHashSet;

use crate::artifact::ArtifactStore;
use crate::fs::Fs;
use crate::graph::StageGraph;
use crate::settings::Settings;
use crate::stage::Outcome;
use crate::tools::Toolchain;
use crate::ui::Ui;

/// This struct actually runs the pipeline.
///
/// It owns the run configuration, the artifact store rooted at the output
/// directory, and the fixed stage sequence built from it. Stages execute one
/// at a time in dependency order; the first failure halts the run, leaving
/// all completed artifacts in place so a re-invocation resumes where this
/// one stopped. Two concurrent runs sharing an output directory are not
/// supported.
pub struct App {
    /// Validated run settings
    settings: Settings,
    /// Filesystem interface
    fs: Fs,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let fs = Fs::new(&settings.output, settings.dry_run);
        let ui = Ui::new(&settings);
        Self { settings, fs, ui }
    }

    /// Run the pipeline end to end.
    pub fn run(mut self) -> Result<()> {
        if self.ui.verbose {
            eprintln!("Using output directory {:?}", self.settings.output);
        }
        self.fs.ensure_output_dir_exists(self.ui.verbose)?;

        let store = ArtifactStore::new(self.fs.root());
        let tools = Toolchain::new(&self.settings.tools);
        let graph = StageGraph::build(&self.settings, &tools, &store);
        log::debug!("built stage graph with {} stages", graph.stages().len());

        if self.settings.dry_run {
            self.print_plan(&graph, &store);
            return Ok(());
        }

        self.fs
            .create_dir(self.fs.logs_dir())
            .context("creating logs directory")?;

        self.run_stages(&graph, &store)
            .context("while running pipeline")?;

        if self.settings.delete_intermediates {
            self.delete_intermediates(&graph, &store)
                .context("while deleting intermediate artifacts")?;
        }

        self.print_summary(&graph, &store);
        Ok(())
    }
}

// RUNNING /////////////////
impl App {
    fn run_stages(&mut self, graph: &StageGraph, store: &ArtifactStore) -> Result<()> {
        let log_dir = self.fs.logs_dir();
        let mut executed = 0usize;
        let mut skipped = 0usize;

        for stage in graph.stages() {
            self.ui.start_timer();
            self.ui
                .verbose_msg(&format!("\nstarting stage '{}'", stage.name));

            match stage.run(store, &self.fs, &log_dir, self.ui.verbose) {
                Ok(Outcome::Skipped) => {
                    eprintln!(
                        "{} {} (outputs already present)",
                        "SKIP".yellow(),
                        stage.name
                    );
                    skipped += 1;
                }
                Ok(Outcome::Executed) => {
                    self.ui.print_elapsed(&stage.name)?;
                    eprintln!("{} {}", "COMPLETED".green(), stage.name);
                    executed += 1;
                }
                Err(e) => {
                    // completed artifacts stay on disk for inspection and resumption
                    eprintln!("{} {}", "FAILED".red(), stage.name);
                    return Err(e);
                }
            }
        }

        eprintln!(
            "\n{} ({executed} stages run, {skipped} skipped).",
            "Completed pipeline".green()
        );
        Ok(())
    }
}

// CLEANUP /////////////////
impl App {
    /// Delete every artifact not marked final, companion indexes included.
    fn delete_intermediates(&self, graph: &StageGraph, store: &ArtifactStore) -> Result<()> {
        let mut keep: FxHashSet<PathBuf> = FxHashSet::default();
        for artifact in graph.final_outputs() {
            keep.insert(store.resolve(artifact));
            if let Some(index) = artifact.index_companion() {
                keep.insert(store.resolve(&index));
            }
        }

        self.ui.verbose_progress("Deleting intermediate artifacts");
        for artifact in graph.all_outputs() {
            let path = store.resolve(&artifact);
            if keep.contains(&path) || !self.fs.exists(&path) {
                continue;
            }
            log::info!("deleting intermediate {:?}", path);
            self.fs.delete_file(&path)?;
        }
        self.ui.done();
        Ok(())
    }
}

// REPORTING ///////////////
impl App {
    fn print_plan(&self, graph: &StageGraph, store: &ArtifactStore) {
        eprintln!("Dry run. Planned stages:");
        for stage in graph.stages() {
            let status = if stage.is_complete(store, &self.fs) {
                "skip".yellow()
            } else {
                "run ".green()
            };
            eprintln!("  [{status}] {}", stage.name);
            eprintln!("         {}", stage.command_line());
        }
        eprintln!("Nothing was executed.");
    }

    fn print_summary(&self, graph: &StageGraph, store: &ArtifactStore) {
        eprintln!("\n{}", "Final outputs:".green());
        for artifact in graph.final_outputs() {
            eprintln!("  {}: {:?}", artifact.name, store.resolve(artifact));
        }
    }
}
