/// High-level pipeline orchestrator
mod app;
/// Definition of command-line args
mod args;
/// Logical artifacts and their on-disk locations
mod artifact;
/// Filesystem operations
mod fs;
/// Stage topology for the two calling rounds
mod graph;
/// Validated run settings
mod settings;
/// A single schedulable unit of work
mod stage;
/// External tool adapters
mod tools;
/// Text UI
mod ui;

// exported for tests:
pub use app::App;
pub use args::Args;
pub use settings::Settings;

/// Run the command-line app.
pub fn run() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()?;

    Ok(())
}
