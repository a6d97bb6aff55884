use std::io::IsTerminal;

use anyhow::{Context, Result};
use nix::{
    sys::signal::{signal, SigHandler, Signal},
    unistd::{self, Pid},
};
use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{config::Config, error::Error};
use jobs::{Filter, JobControl, Terminal};
use parser::parse_cmd;

pub mod builtin;
pub mod jobs;
pub mod lexer;
pub mod parser;

/// Retries `f` while it fails with EINTR.
pub(crate) fn syscall<F, T>(f: F) -> Result<T, nix::Error>
where
    F: Fn() -> Result<T, nix::Error>,
{
    loop {
        match f() {
            Err(nix::errno::Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// What the REPL does after a line.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue(i32), // Keep reading. (i32) is the exit code
    Quit(i32),     // Leave the shell. (i32) is the exit code
}

#[derive(Debug)]
pub struct Shell {
    config: Config,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Interactive loop. Returns the shell's exit code.
    pub fn run(&self) -> Result<i32> {
        if !std::io::stdin().is_terminal() {
            return Err(Error::NotInteractive.into());
        }
        if unistd::getsid(None)? != unistd::getpgid(None)? {
            unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).context("setpgid")?;
        }
        // Ctrl-C and Ctrl-Z are meant for the foreground job, and the
        // shell must survive touching the terminal from the background.
        for sig in [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU] {
            unsafe { signal(sig, SigHandler::SigIgn) }?;
        }
        let mut jobs = JobControl::init(Terminal::attach()?)?;

        let mut rl = DefaultEditor::new()?;
        if let Err(e) = rl.load_history(&self.config.history) {
            tracing::debug!("unable to load history: {}", e);
        }

        let mut last = 0;
        let mut fatal = None;
        loop {
            match rl.readline(&self.config.prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        let _ = rl.add_history_entry(line);
                        match self.eval(&mut jobs, line, last) {
                            Ok(Flow::Continue(n)) => last = n,
                            Ok(Flow::Quit(n)) => {
                                last = n;
                                break;
                            }
                            Err(e) if !e.is_fatal() => {
                                eprintln!("jobsh: {}", e);
                                last = 1;
                            }
                            Err(e) => {
                                fatal = Some(e);
                                break;
                            }
                        }
                    }
                    jobs.watch(Filter::Finished);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => {
                    eprintln!();
                    break;
                }
                Err(e) => {
                    eprintln!("jobsh: {}", e);
                    last = 1;
                    break;
                }
            }
        }

        if let Err(e) = rl.save_history(&self.config.history) {
            eprintln!("jobsh: unable to save history: {}", e);
        }
        jobs.shutdown()?;
        match fatal {
            Some(e) => Err(e.into()),
            None => Ok(last),
        }
    }

    fn eval(&self, jobs: &mut JobControl, line: &str, last: i32) -> Result<Flow, Error> {
        let Some(pipeline) = parse_cmd(line)? else {
            return Ok(Flow::Continue(last));
        };
        if let Some(stage) = pipeline.simple().filter(|_| !pipeline.background) {
            if let Some(flow) = quit(&stage.words, last)? {
                return Ok(flow);
            }
        }
        if let Some(stage) = pipeline.shell_stage() {
            if let Some(code) = builtin::run(jobs, &stage.words)? {
                return Ok(Flow::Continue(code));
            }
        }
        jobs.run(&pipeline, builtin::run).map(Flow::Continue)
    }
}

/// `quit`/`exit [code]`, defaulting to the last status.
fn quit(words: &[String], last: i32) -> Result<Option<Flow>, Error> {
    match words {
        [name, args @ ..] if name == "quit" || name == "exit" => match args {
            [] => Ok(Some(Flow::Quit(last))),
            [code] => code
                .parse()
                .map(|n| Some(Flow::Quit(n)))
                .map_err(|_| Error::Syntax(format!("{}: invalid argument: {}", name, code))),
            _ => Err(Error::Syntax(format!("{}: too many arguments", name))),
        },
        _ => Ok(None),
    }
}
