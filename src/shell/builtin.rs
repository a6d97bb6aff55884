//! Commands the shell runs itself.

use std::{io::Write, path::PathBuf};

use super::jobs::{Filter, JobControl, JobId};
use crate::error::{Error, Result};

/// Runs `words` if they name a built-in; `Ok(None)` otherwise.
pub fn run(jobs: &mut JobControl, words: &[String]) -> Result<Option<i32>> {
    let Some((name, args)) = words.split_first() else {
        return Ok(None);
    };
    let code = match name.as_str() {
        "cd" => run_cd(args),
        "jobs" => {
            let mut out = std::io::stdout().lock();
            for report in jobs.reports(Filter::All) {
                // A closed reader only loses the listing.
                let _ = writeln!(out, "{}", report);
            }
            0
        }
        "fg" => run_resume(jobs, args, true)?,
        "bg" => run_resume(jobs, args, false)?,
        "kill" => run_kill(jobs, args)?,
        _ => return Ok(None),
    };
    Ok(Some(code))
}

fn job_arg(arg: &str) -> Result<JobId> {
    arg.parse().map_err(|_| Error::BadJob(arg.to_string()))
}

fn run_cd(args: &[String]) -> i32 {
    let dir = match args.first() {
        Some(dir) => PathBuf::from(dir),
        None => match dirs::home_dir() {
            Some(home) => home,
            None => {
                eprintln!("cd: HOME not set");
                return 1;
            }
        },
    };
    match std::env::set_current_dir(&dir) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("cd: {}: {}", dir.display(), e);
            1
        }
    }
}

fn run_resume(jobs: &mut JobControl, args: &[String], foreground: bool) -> Result<i32> {
    let id = args.first().map(|a| job_arg(a)).transpose()?;
    match jobs.resume(id, foreground)? {
        Some(code) => Ok(code),
        None => Err(Error::BadJob(
            args.first().cloned().unwrap_or_else(|| "current".to_string()),
        )),
    }
}

fn run_kill(jobs: &mut JobControl, args: &[String]) -> Result<i32> {
    let Some(arg) = args.first() else {
        return Err(Error::Syntax("kill: job number required".to_string()));
    };
    if jobs.kill(job_arg(arg)?)? {
        Ok(0)
    } else {
        Err(Error::BadJob(arg.clone()))
    }
}
