use std::fs::File;
use std::io::{stderr, stdout, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::fs::Fs;

use super::{Error, Invocation};

/// Where the child's stdout goes: teed to the terminal and a log file, or
/// captured into a temp file that becomes an output artifact on success.
enum Sink {
    Tee(File),
    Capture { tmp: PathBuf, file: File, out: PathBuf },
}

/// Run a subprocess, storing stdout and stderr under `log_dir`.
/// Based on:
/// <https://stackoverflow.com/questions/66060139/how-to-tee-stdout-stderr-from-a-subprocess-in-rust>
pub(super) fn run_cmd(
    inv: &Invocation,
    stage: &str,
    fs: &Fs,
    log_dir: &Path,
    verbose: bool,
) -> Result<()> {
    let err_log = log_dir.join(format!("{stage}.stderr.txt"));
    let err_file = fs.create_file(&err_log).context("creating stderr log file")?;

    let sink = match &inv.stdout_to {
        Some(out) => {
            let tmp = tmp_path(out);
            let file = fs.create_file(&tmp).context("creating stdout capture file")?;
            Sink::Capture {
                tmp,
                file,
                out: out.clone(),
            }
        }
        None => {
            let out_log = log_dir.join(format!("{stage}.stdout.txt"));
            Sink::Tee(fs.create_file(&out_log).context("creating stdout log file")?)
        }
    };

    if verbose {
        eprintln!("{} {}", "$".magenta(), inv.command_line());
    }
    log::debug!("running: {}", inv.command_line());

    let mut child = Command::new(&inv.program)
        .args(&inv.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn {
            program: inv.program.clone(),
            source,
        })?;

    let child_out = child.stdout.take().expect("Cannot attach to child stdout");
    let child_err = child.stderr.take().expect("Cannot attach to child stderr");

    let (thread_out, finalize) = match sink {
        Sink::Capture { tmp, mut file, out } => {
            let t = thread::spawn(move || {
                let mut child_out = child_out;
                std::io::copy(&mut child_out, &mut file).expect("error capturing child stdout");
            });
            (t, Some((tmp, out)))
        }
        Sink::Tee(file) => {
            let t = thread::spawn(move || {
                communicate(child_out, file, stdout())
                    .expect("error communicating with child stdout")
            });
            (t, None)
        }
    };
    let thread_err = thread::spawn(move || {
        communicate(child_err, err_file, stderr()).expect("error communicating with child stderr")
    });

    thread_out.join().expect("Error joining stdout thread");
    thread_err.join().expect("Error joining stderr thread");

    let status = child.wait().expect("failed to wait on child process");

    if status.success() {
        if let Some((tmp, out)) = finalize {
            fs.rename(&tmp, &out).context("finalizing captured output")?;
        }
        // an absent tmp (tool exited 0 without writing) is left for the
        // stage's output check to report
        for (tmp, out) in &inv.staged {
            if fs.exists(tmp) {
                fs.rename(tmp, out).context("finalizing tool output")?;
            }
        }
        if verbose {
            eprintln!("{} with {status}.", "Process finished".green());
        }
        Ok(())
    } else {
        // never let a partial write be mistaken for a finished artifact
        if let Some((tmp, _)) = finalize {
            let _ = fs.delete_file(&tmp);
        }
        for (tmp, _) in &inv.staged {
            if fs.exists(tmp) {
                let _ = fs.delete_file(tmp);
            }
        }
        Err(Error::Failed {
            program: inv.program.clone(),
            status,
            stderr_tail: tail_of(&err_log),
        }
        .into())
    }
}

fn communicate<R: Read, W: Write>(
    mut stream: R,
    mut file: File,
    mut output: W,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let num_read = stream.read(&mut buf)?;
        if num_read == 0 {
            break;
        }

        let buf = &buf[..num_read];
        file.write_all(buf)?;
        output.write_all(buf)?;
    }

    Ok(())
}

pub(super) fn tmp_path(out: &Path) -> PathBuf {
    let mut s = out.to_path_buf().into_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

fn tail_of(log: &Path) -> String {
    match std::fs::read_to_string(log) {
        Ok(text) => {
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(8);
            lines[start..].join("\n")
        }
        Err(_) => String::from("<stderr log unavailable>"),
    }
}
