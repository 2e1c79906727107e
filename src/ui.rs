use std::time::{SystemTime, SystemTimeError};

use colored::Colorize;

use crate::settings::Settings;

/// Utility for keeping track of the time it took to perform some operation.
struct Timer {
    start_time: SystemTime,
}

impl Timer {
    fn now() -> Self {
        Self {
            start_time: SystemTime::now(),
        }
    }

    fn reset(&mut self) {
        self.start_time = SystemTime::now();
    }

    fn print_elapsed(&self, task: &str) -> Result<(), SystemTimeError> {
        eprintln!("{} took {:?}", task, self.start_time.elapsed()?);
        Ok(())
    }
}

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// keeps track of time for each stage
    timer: Timer,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            timer: Timer::now(),
        }
    }

    pub fn start_timer(&mut self) {
        if self.verbose {
            self.timer.reset();
        }
    }

    pub fn print_elapsed(&mut self, task: &str) -> Result<(), SystemTimeError> {
        if self.verbose {
            self.timer.print_elapsed(task)
        } else {
            Ok(())
        }
    }

    pub fn verbose_msg(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg);
        }
    }

    pub fn verbose_progress(&self, msg: &str) {
        if self.verbose {
            eprint!("{}... ", msg.magenta());
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }
}
